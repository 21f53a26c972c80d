use crate::accessor::Limits;
use crate::buffer::DEFAULT_FILE_CAPACITY;
use crate::stream::DEFAULT_STREAM_CAPACITY;
use crate::tracker::DEFAULT_MAX_DEPTH;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Buffer ceilings and walk defaults.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    #[serde(default = "default_file_capacity")]
    pub file_capacity: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_allow_evil")]
    pub allow_evil: bool,
}

fn default_stream_capacity() -> usize {
    DEFAULT_STREAM_CAPACITY
}

fn default_file_capacity() -> usize {
    DEFAULT_FILE_CAPACITY
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_allow_evil() -> bool {
    true
}

impl EngineSettings {
    pub fn limits(&self) -> Limits {
        Limits {
            stream_capacity: self.stream_capacity,
            file_capacity: self.file_capacity,
            max_depth: self.max_depth,
            allow_evil: self.allow_evil,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stream_capacity: default_stream_capacity(),
            file_capacity: default_file_capacity(),
            max_depth: default_max_depth(),
            allow_evil: default_allow_evil(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Fixed seed for reproducible runs; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

pub fn default_iterations() -> u64 {
    100
}

pub fn default_output_dir() -> PathBuf {
    PathBuf::from("./strata_out")
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            seed: None,
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusConfig {
    pub initial_seed_paths: Option<Vec<PathBuf>>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub corpus: Option<CorpusConfig>,
}

impl StrataConfig {
    pub const DEFAULT_FILE_NAME: &'static str = "strata.toml";

    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn seed_paths(&self) -> &[PathBuf] {
        self.corpus
            .as_ref()
            .and_then(|corpus| corpus.initial_seed_paths.as_deref())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let config = StrataConfig::from_toml("").unwrap();
        assert_eq!(config, StrataConfig::default());
        assert_eq!(config.engine.limits(), Limits::default());
        assert!(config.seed_paths().is_empty());
    }

    #[test]
    fn sections_are_kebab_case() {
        let config = StrataConfig::from_toml(
            r#"
            [engine]
            stream-capacity = 2048
            allow-evil = false

            [fuzzer]
            iterations = 5
            seed = 7
            output-dir = "out"

            [corpus]
            initial-seed-paths = ["seeds"]
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.stream_capacity, 2048);
        assert_eq!(config.engine.file_capacity, DEFAULT_FILE_CAPACITY);
        assert!(!config.engine.limits().allow_evil);
        assert_eq!(config.fuzzer.iterations, 5);
        assert_eq!(config.fuzzer.seed, Some(7));
        assert_eq!(config.fuzzer.output_dir, PathBuf::from("out"));
        assert_eq!(config.seed_paths(), [PathBuf::from("seeds")]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(StrataConfig::from_toml("[engine]\nthreads = 4\n").is_err());
        assert!(StrataConfig::from_toml("[executor]\n").is_err());
    }

    #[test]
    fn load_from_file_reports_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(StrataConfig::DEFAULT_FILE_NAME);
        std::fs::write(&path, "[fuzzer]\niterations = 3\n").unwrap();
        assert_eq!(StrataConfig::load_from_file(&path).unwrap().fuzzer.iterations, 3);

        let missing = dir.path().join("missing.toml");
        let err = StrataConfig::load_from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
