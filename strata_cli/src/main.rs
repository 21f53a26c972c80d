mod artifacts;

use anyhow::{Context, anyhow, bail};
use artifacts::ArtifactWriter;
use clap::{Parser, Subcommand, ValueEnum};
use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use strata_core::error::walk_exit_code;
use strata_core::formats::{Png, Riff};
use strata_core::{
    Chunk, ChunkCorpus, Grammar, Limits, Mutation, MutationError, Mutator, ProductionKind,
    SmartMutator, StrataConfig, Walk, WalkError, generate, parse,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Grammar-driven generation, parsing and smart mutation of binary files", long_about = None)]
struct Cli {
    /// Grammar to run.
    #[clap(long, value_enum, global = true, default_value_t = Format::Png)]
    format: Format,
    /// Configuration file. Defaults to `strata.toml` in the working directory, if present.
    #[clap(short, long, value_parser, global = true)]
    config: Option<PathBuf>,
    /// Log filter used when `RUST_LOG` is not set, e.g. `debug` or `strata_core=trace`.
    #[clap(long, global = true, default_value = "info")]
    log_level: String,
    #[clap(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Png,
    Riff,
}

/// Chunk coordinates are inclusive file byte ranges.
#[derive(Subcommand, Debug)]
enum Command {
    /// Generate files from random decision streams, or smart-mutate a seed corpus.
    Fuzz {
        #[clap(short = 'n', long)]
        count: Option<u64>,
        #[clap(short, long)]
        out_dir: Option<PathBuf>,
        #[clap(long)]
        seed: Option<u64>,
        /// Seed files or directories. Switches from generation to mutation.
        #[clap(long, num_args = 1..)]
        seeds: Vec<PathBuf>,
    },
    /// Replay a decision stream into a file.
    Generate { decisions: PathBuf, output: PathBuf },
    /// Parse a file and report its chunks.
    Parse {
        file: PathBuf,
        /// Where to write the reconstructed decision stream.
        #[clap(long)]
        decisions: Option<PathBuf>,
        #[clap(long)]
        json: bool,
    },
    /// Replace a chunk of TARGET with a chunk of DONOR.
    Replace {
        target: PathBuf,
        start: usize,
        end: usize,
        donor: PathBuf,
        donor_start: usize,
        donor_end: usize,
        output: PathBuf,
    },
    /// Delete an optional chunk.
    Delete {
        target: PathBuf,
        start: usize,
        end: usize,
        output: PathBuf,
    },
    /// Insert an optional chunk of DONOR at file offset POS of TARGET.
    Insert {
        target: PathBuf,
        pos: usize,
        donor: PathBuf,
        donor_start: usize,
        donor_end: usize,
        output: PathBuf,
    },
    /// Regenerate a chunk from fresh randomness, keeping the rest of the file.
    Abstract {
        target: PathBuf,
        start: usize,
        end: usize,
        output: PathBuf,
    },
    /// Exchange two chunks.
    Swap {
        target: PathBuf,
        start1: usize,
        end1: usize,
        start2: usize,
        end2: usize,
        output: PathBuf,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StrataConfig> {
    match path {
        Some(config_path) => {
            info!(?config_path, "loading configuration");
            StrataConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = Path::new(StrataConfig::DEFAULT_FILE_NAME);
            if default_config_path.exists() {
                info!(?default_config_path, "loading default configuration");
                StrataConfig::load_from_file(default_config_path)
            } else {
                debug!("no configuration file found, using built-in defaults");
                Ok(StrataConfig::default())
            }
        }
    }
}

/// Process status for a failed command.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(mutation_error) = err.downcast_ref::<MutationError>() {
        return mutation_error.exit_code();
    }
    if let Some(walk_error) = err.downcast_ref::<WalkError>() {
        return walk_exit_code(walk_error);
    }
    -1
}

fn precondition(reason: String) -> anyhow::Error {
    anyhow::Error::new(MutationError::Precondition(reason))
}

fn load_walk<G: Grammar>(
    grammar: &G,
    limits: &Limits,
    path: &Path,
) -> anyhow::Result<Walk<G::Kind>> {
    let input = fs::read(path).with_context(|| format!("Failed to read {path:?}"))?;
    parse(grammar, &input, limits).map_err(|err| {
        if let Some(validity) = err.validity(input.len()) {
            warn!(?path, validity_pct = validity * 100.0, "input parsed only partially");
        }
        anyhow::Error::new(err).context(format!("{path:?} is not a valid {} file", grammar.name()))
    })
}

fn chunk_at<'w, K: ProductionKind>(
    walk: &'w Walk<K>,
    start: usize,
    end: usize,
    path: &Path,
) -> anyhow::Result<&'w Chunk<K>> {
    walk.find_chunk(start, end)
        .ok_or_else(|| precondition(format!("no chunk of {path:?} spans bytes {start}..={end}")))
}

fn write_mutation<K>(
    mutation: Result<Mutation<K>, MutationError>,
    output: &Path,
) -> anyhow::Result<i32> {
    let mutation = mutation?;
    fs::write(output, &mutation.walk.file).with_context(|| format!("Failed to write {output:?}"))?;
    info!(
        operation = %mutation.operation,
        outcome = ?mutation.outcome,
        bytes = mutation.walk.file.len(),
        ?output,
        "mutation written"
    );
    Ok(mutation.outcome.exit_code())
}

fn fuzz<G: Grammar>(
    grammar: &G,
    config: &StrataConfig,
    count: Option<u64>,
    out_dir: Option<PathBuf>,
    seed: Option<u64>,
    seeds: Vec<PathBuf>,
) -> anyhow::Result<i32> {
    let limits = config.engine.limits();
    let iterations = count.unwrap_or(config.fuzzer.iterations);
    let out_dir = out_dir.unwrap_or_else(|| config.fuzzer.output_dir.clone());
    let seed = seed.or(config.fuzzer.seed).unwrap_or_else(rand::random);
    let seed_paths = if seeds.is_empty() {
        config.seed_paths().to_vec()
    } else {
        seeds
    };

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut writer = ArtifactWriter::new(&out_dir, grammar.file_extension())?;
    let mut corpus = ChunkCorpus::new();
    if !seed_paths.is_empty() && corpus.load_seeds(grammar, &limits, &seed_paths)? == 0 {
        bail!("no seed file under {seed_paths:?} is a valid {} file", grammar.name());
    }
    let mut mutator = SmartMutator::new(grammar, limits);

    info!(
        grammar = grammar.name(),
        iterations,
        seed,
        ?out_dir,
        corpus = corpus.len(),
        "starting fuzz loop"
    );
    let start_time = Instant::now();
    let mut failures = 0u64;
    for i in 0..iterations {
        let produced = if corpus.is_empty() {
            let mut decisions = vec![0u8; limits.stream_capacity];
            rng.fill_bytes(&mut decisions);
            generate(grammar, &decisions, &limits).map_err(anyhow::Error::from)
        } else {
            let target = corpus
                .random_file(&mut rng)
                .ok_or_else(|| anyhow!("seed corpus is empty"))?;
            mutator
                .mutate(target, &corpus, &mut rng)
                .map(|mutation| mutation.walk)
                .map_err(anyhow::Error::from)
        };
        match produced {
            Ok(walk) => {
                if let Some(path) = writer.save(&walk.file, &walk.decisions)? {
                    debug!(iteration = i, ?path, "new output");
                }
            }
            Err(err) => {
                failures += 1;
                debug!(iteration = i, %err, "no output");
            }
        }

        if i > 0 && i % (iterations / 100).max(1) == 0 {
            print!(
                "\rIter: {}/{}, Distinct: {}, Failed: {}   ",
                i,
                iterations,
                writer.distinct(),
                failures
            );
            io::stdout().flush()?;
        }
    }
    let elapsed_total = start_time.elapsed();
    println!("\nFuzz loop finished in {elapsed_total:.2?}.");
    println!(
        "Attempts: {}, Distinct outputs: {}, Failed attempts: {}, Seed: {}",
        iterations,
        writer.distinct(),
        failures,
        seed
    );
    Ok(0)
}

fn print_chunks<K: ProductionKind>(walk: &Walk<K>) {
    for chunk in &walk.chunks {
        let flags = match (chunk.optional, chunk.appendable) {
            (true, true) => "optional, appendable",
            (true, false) => "optional",
            (false, true) => "appendable",
            (false, false) => "",
        };
        println!(
            "{:>6}..{:<6} decisions {:>6}..{:<6} {} {}",
            chunk.file.start,
            chunk.file.end,
            chunk.decisions.start,
            chunk.decisions.end,
            chunk.name,
            flags
        );
    }
}

fn run<G: Grammar>(grammar: &G, command: Command, config: &StrataConfig) -> anyhow::Result<i32> {
    let limits = config.engine.limits();
    let mutator = SmartMutator::new(grammar, limits);
    let mut rng = ChaCha8Rng::seed_from_u64(config.fuzzer.seed.unwrap_or_else(rand::random));

    match command {
        Command::Fuzz {
            count,
            out_dir,
            seed,
            seeds,
        } => fuzz(grammar, config, count, out_dir, seed, seeds),
        Command::Generate { decisions, output } => {
            let stream =
                fs::read(&decisions).with_context(|| format!("Failed to read {decisions:?}"))?;
            let walk = generate(grammar, &stream, &limits)
                .with_context(|| format!("Failed to generate from {decisions:?}"))?;
            fs::write(&output, &walk.file).with_context(|| format!("Failed to write {output:?}"))?;
            info!(
                bytes = walk.file.len(),
                decisions = walk.decisions.len(),
                ?output,
                "file generated"
            );
            Ok(0)
        }
        Command::Parse {
            file,
            decisions,
            json,
        } => {
            let walk = load_walk(grammar, &limits, &file)?;
            if let Some(path) = decisions {
                fs::write(&path, &walk.decisions)
                    .with_context(|| format!("Failed to write {path:?}"))?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&walk.summaries())?);
            } else {
                print_chunks(&walk);
            }
            Ok(0)
        }
        Command::Replace {
            target,
            start,
            end,
            donor,
            donor_start,
            donor_end,
            output,
        } => {
            let target_walk = load_walk(grammar, &limits, &target)?;
            let donor_walk = load_walk(grammar, &limits, &donor)?;
            let chunk = chunk_at(&target_walk, start, end, &target)?;
            let donor_chunk = chunk_at(&donor_walk, donor_start, donor_end, &donor)?;
            write_mutation(
                mutator.replace(
                    &target_walk,
                    chunk,
                    donor_chunk,
                    donor_walk.decisions_of(donor_chunk),
                    &mut rng,
                ),
                &output,
            )
        }
        Command::Delete {
            target,
            start,
            end,
            output,
        } => {
            let target_walk = load_walk(grammar, &limits, &target)?;
            let chunk = chunk_at(&target_walk, start, end, &target)?;
            write_mutation(mutator.delete(&target_walk, chunk, &mut rng), &output)
        }
        Command::Insert {
            target,
            pos,
            donor,
            donor_start,
            donor_end,
            output,
        } => {
            let target_walk = load_walk(grammar, &limits, &target)?;
            let donor_walk = load_walk(grammar, &limits, &donor)?;
            let point = target_walk.insertion_point_at(pos).ok_or_else(|| {
                precondition(format!("{target:?} has no insertion point at byte {pos}"))
            })?;
            let donor_chunk = chunk_at(&donor_walk, donor_start, donor_end, &donor)?;
            write_mutation(
                mutator.insert(
                    &target_walk,
                    point,
                    donor_chunk,
                    donor_walk.decisions_of(donor_chunk),
                    &mut rng,
                ),
                &output,
            )
        }
        Command::Abstract {
            target,
            start,
            end,
            output,
        } => {
            let target_walk = load_walk(grammar, &limits, &target)?;
            let chunk = chunk_at(&target_walk, start, end, &target)?;
            write_mutation(mutator.abstract_chunk(&target_walk, chunk, &mut rng), &output)
        }
        Command::Swap {
            target,
            start1,
            end1,
            start2,
            end2,
            output,
        } => {
            let target_walk = load_walk(grammar, &limits, &target)?;
            let first = chunk_at(&target_walk, start1, end1, &target)?;
            let second = chunk_at(&target_walk, start2, end2, &target)?;
            write_mutation(mutator.swap(&target_walk, first, second, &mut rng), &output)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = load_config(cli.config.as_deref()).and_then(|config| {
        debug!(?config, "effective configuration");
        match cli.format {
            Format::Png => run(&Png, cli.command, &config),
            Format::Riff => run(&Riff, cli.command, &config),
        }
    });
    let code = match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// A decision stream the PNG grammar accepts.
    fn png_decisions() -> Vec<u8> {
        let limits = Limits::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        loop {
            let mut decisions = vec![0u8; 4096];
            rng.fill_bytes(&mut decisions);
            if let Ok(walk) = generate(&Png, &decisions, &limits) {
                return walk.decisions;
            }
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["strata", "parse", "a.wav", "--format", "riff", "--json"])
            .unwrap();
        assert_eq!(cli.format, Format::Riff);
        assert!(matches!(cli.command, Command::Parse { json: true, .. }));
    }

    #[test]
    fn swap_takes_two_inclusive_ranges() {
        let cli = Cli::try_parse_from(["strata", "swap", "t.png", "33", "55", "56", "80", "o.png"])
            .unwrap();
        match cli.command {
            Command::Swap {
                start1,
                end1,
                start2,
                end2,
                ..
            } => assert_eq!((start1, end1, start2, end2), (33, 55, 56, 80)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn generate_then_parse_reproduces_the_decisions() {
        let dir = tempdir().unwrap();
        let config = StrataConfig::default();
        let decisions = png_decisions();
        let dec_path = dir.path().join("in.dec");
        let png_path = dir.path().join("out.png");
        let reparsed_path = dir.path().join("out.dec");
        fs::write(&dec_path, &decisions).unwrap();

        let code = run(
            &Png,
            Command::Generate {
                decisions: dec_path,
                output: png_path.clone(),
            },
            &config,
        )
        .unwrap();
        assert_eq!(code, 0);

        run(
            &Png,
            Command::Parse {
                file: png_path.clone(),
                decisions: Some(reparsed_path.clone()),
                json: true,
            },
            &config,
        )
        .unwrap();
        let reparsed = fs::read(&reparsed_path).unwrap();
        let regenerated = generate(&Png, &reparsed, &Limits::default()).unwrap();
        assert_eq!(regenerated.file, fs::read(&png_path).unwrap());
    }

    #[test]
    fn unknown_chunk_range_is_a_precondition_failure() {
        let dir = tempdir().unwrap();
        let png_path = dir.path().join("in.png");
        let walk = generate(&Png, &png_decisions(), &Limits::default()).unwrap();
        fs::write(&png_path, &walk.file).unwrap();

        let err = run(
            &Png,
            Command::Delete {
                target: png_path,
                start: 1,
                end: 2,
                output: dir.path().join("out.png"),
            },
            &StrataConfig::default(),
        )
        .unwrap_err();
        assert_eq!(exit_code_for(&err), -1);
    }

    #[test]
    fn invalid_input_exits_with_the_structural_code() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.png");
        fs::write(&path, b"definitely not a png").unwrap();
        let err = run(
            &Png,
            Command::Parse {
                file: path,
                decisions: None,
                json: false,
            },
            &StrataConfig::default(),
        )
        .unwrap_err();
        assert_eq!(exit_code_for(&err), -4);
    }

    #[test]
    fn fuzz_writes_distinct_outputs_with_their_decisions() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("out");
        run(
            &Riff,
            Command::Fuzz {
                count: Some(50),
                out_dir: Some(out_dir.clone()),
                seed: Some(9),
                seeds: Vec::new(),
            },
            &StrataConfig::default(),
        )
        .unwrap();

        let names: Vec<_> = fs::read_dir(&out_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        let outputs: Vec<_> = names
            .iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "wav"))
            .collect();
        assert!(!outputs.is_empty());
        for output in outputs {
            let decisions = fs::read(output.with_extension("dec")).unwrap();
            let walk = generate(&Riff, &decisions, &Limits::default()).unwrap();
            assert_eq!(walk.file, fs::read(output).unwrap());
        }
    }
}
