use anyhow::Context;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes fuzzer outputs named by the MD5 digest of their contents, next to the
/// decision stream that regenerates them.
#[derive(Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
    extension: &'static str,
    seen: HashSet<[u8; 16]>,
}

impl ArtifactWriter {
    pub fn new(dir: &Path, extension: &'static str) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {dir:?}"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            extension,
            seen: HashSet::new(),
        })
    }

    /// Saves `file` and `decisions`; returns `None` for a file already written.
    pub fn save(&mut self, file: &[u8], decisions: &[u8]) -> anyhow::Result<Option<PathBuf>> {
        let digest = md5::compute(file);
        if !self.seen.insert(digest.0) {
            return Ok(None);
        }
        let stem = format!("{digest:x}");
        let path = self.dir.join(format!("{stem}.{}", self.extension));
        if path.exists() {
            return Ok(None);
        }
        fs::write(&path, file).with_context(|| format!("Failed to write {path:?}"))?;
        let dec_path = self.dir.join(format!("{stem}.dec"));
        fs::write(&dec_path, decisions).with_context(|| format!("Failed to write {dec_path:?}"))?;
        Ok(Some(path))
    }

    pub fn distinct(&self) -> usize {
        self.seen.len()
    }
}
