//! ripple-scan - warm the peak cache for a directory
//!
//! ```text
//! ripple-scan <dir> [--columns N] [--recursive] [--prune] [--config PATH]
//! ```
//!
//! Generates peaks for every audio file through the engine, so the cache
//! index in each directory is populated before the UI opens it. Exits
//! non-zero if any file failed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use ripple_core::config::{default_config_path, load_config, EngineConfig};
use ripple_core::{EngineEvent, GenerateOutcome, WaveformEngine};

const AUDIO_EXTENSIONS: &[&str] = &["wav", "wave", "flac", "mp3", "ogg", "oga", "m4a", "mp4", "aac"];

struct Args {
    dir: PathBuf,
    columns: Option<usize>,
    recursive: bool,
    prune: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut dir = None;
    let mut columns = None;
    let mut recursive = false;
    let mut prune = false;
    let mut config = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--columns" => {
                let value = args.next().context("--columns needs a value")?;
                columns = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid column count: {}", value))?,
                );
            }
            "--recursive" | "-r" => recursive = true,
            "--prune" => prune = true,
            "--config" => {
                config = Some(PathBuf::from(args.next().context("--config needs a path")?));
            }
            "--help" | "-h" => {
                println!("usage: ripple-scan <dir> [--columns N] [--recursive] [--prune] [--config PATH]");
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown flag: {}", other),
            other => {
                if dir.is_some() {
                    bail!("only one directory can be scanned at a time");
                }
                dir = Some(PathBuf::from(other));
            }
        }
    }

    Ok(Args {
        dir: dir.context("usage: ripple-scan <dir> [--columns N] [--recursive]")?,
        columns,
        recursive,
        prune,
        config,
    })
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

fn collect_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(dir).follow_links(true).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    walker
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("[SCAN] Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    if !args.dir.is_dir() {
        bail!("{:?} is not a directory", args.dir);
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config: EngineConfig = load_config(&config_path);
    if let Some(columns) = args.columns {
        config.column_count = columns;
    }

    let files = collect_files(&args.dir, args.recursive);
    log::info!("[SCAN] {} audio files under {:?}", files.len(), args.dir);

    let engine = WaveformEngine::new(config);
    let events = engine.subscribe();
    let max_in_flight = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);

    if args.prune {
        let mut dirs: Vec<PathBuf> = files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect();
        dirs.sort();
        dirs.dedup();
        for dir in dirs {
            match engine.cache().prune(&dir) {
                Ok(0) => {}
                Ok(n) => println!("pruned {:>4} stale entries  {}", n, dir.display()),
                Err(e) => log::warn!("[SCAN] Could not prune {:?}: {}", dir, e),
            }
        }
    }

    let started = Instant::now();
    let mut pending: HashSet<PathBuf> = HashSet::new();
    let mut cached = 0usize;
    let mut generated = 0usize;
    let mut failed = 0usize;

    let mut queue = files.into_iter();
    loop {
        while pending.len() < max_in_flight {
            let Some(path) = queue.next() else { break };
            match engine.generate(&path) {
                GenerateOutcome::Started | GenerateOutcome::Coalesced => {
                    pending.insert(path);
                }
                GenerateOutcome::AlreadyReady => {
                    cached += 1;
                    report_ready(&engine, &path, "cached");
                }
                GenerateOutcome::Failed(kind) => {
                    failed += 1;
                    println!("FAILED  {}  ({})", path.display(), kind);
                }
            }
        }

        if pending.is_empty() {
            break;
        }

        match events.recv_timeout(Duration::from_millis(500)) {
            Ok(EngineEvent::Ready { path, cached: hit }) => {
                if pending.remove(&path) {
                    if hit {
                        cached += 1;
                        report_ready(&engine, &path, "cached");
                    } else {
                        generated += 1;
                        report_ready(&engine, &path, "ok");
                    }
                }
            }
            Ok(EngineEvent::Error { path, kind, message }) => {
                if pending.remove(&path) {
                    failed += 1;
                    println!("FAILED  {}  ({}: {})", path.display(), kind, message);
                }
            }
            Ok(_) => {}
            Err(_) => {
                if engine.active_jobs() == 0 {
                    // Workers are gone but never reported; don't wait forever
                    for path in pending.drain() {
                        if engine.is_ready(&path) {
                            generated += 1;
                            report_ready(&engine, &path, "ok");
                        } else {
                            failed += 1;
                            println!("FAILED  {}  (worker exited without a result)", path.display());
                        }
                    }
                }
            }
        }
    }

    println!(
        "\n{} generated, {} cached, {} failed in {:.1}s",
        generated,
        cached,
        failed,
        started.elapsed().as_secs_f64()
    );

    engine.shutdown();
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn report_ready(engine: &WaveformEngine, path: &Path, label: &str) {
    match engine.get_peaks(path) {
        Some(peaks) => println!(
            "{:<7} {}  ({} columns, {:.1}s)",
            label,
            path.display(),
            peaks.len(),
            peaks.duration_ms as f64 / 1000.0
        ),
        None => println!("{:<7} {}", label, path.display()),
    }
}
