//! Pastry CLI driver
//!
//! Runs the termination analysis on a batch of probabilistic counter
//! programs:
//!
//! ```text
//! pastry --input <glob>... [--timeout <seconds>] [--csv]
//! ```
//!
//! Per input, either a three-line human report (`AST:`, `PAST:`, `Time:`)
//! or one CSV row `name,ast,past,seconds` (`None,None,TO` on timeout).
//! Each input gets its own wall-clock deadline (default 90 s) and its own
//! log file under `outputs/logs/`. A failing input is reported on stderr
//! and the batch continues; the exit code is non-zero only for unusable
//! invocations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use pastry::{analyze_source, Verdict};

const USAGE: &str = "usage: pastry --input <glob>... [--timeout <seconds>] [--csv]";

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

/// Collect every value following `key` up to the next `--` flag.
fn parse_multi(args: &[String], key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut it = args.iter().peekable();
    while let Some(a) = it.next() {
        if a != key {
            continue;
        }
        while let Some(v) = it.peek() {
            if v.starts_with("--") {
                break;
            }
            out.push((*v).clone());
            it.next();
        }
    }
    out
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let patterns = parse_multi(&args, "--input");
    if patterns.is_empty() {
        anyhow::bail!("{USAGE}");
    }
    let timeout = parse_flag(&args, "--timeout")
        .map(|s| s.parse::<f64>())
        .transpose()
        .context("--timeout expects a number of seconds")?
        .unwrap_or(90.0);
    let csv = has_flag(&args, "--csv");

    let mut inputs: Vec<PathBuf> = Vec::new();
    for pattern in &patterns {
        let entries =
            glob::glob(pattern).with_context(|| format!("bad glob pattern `{pattern}`"))?;
        let mut matched = false;
        for entry in entries {
            match entry {
                Ok(path) => {
                    matched = true;
                    inputs.push(path);
                }
                Err(e) => eprintln!("{pattern}: {e}"),
            }
        }
        if !matched {
            eprintln!("no inputs match `{pattern}`");
        }
    }

    for path in inputs {
        run_one(&path, timeout, csv);
    }
    Ok(())
}

enum Outcome {
    Done(Result<Verdict, String>),
    TimedOut,
}

fn run_one(path: &Path, timeout: f64, csv: bool) {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input")
        .to_string();
    if !csv {
        println!("Running: {}", path.display());
    }
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            report(&name, csv, 0.0, Outcome::Done(Err(e.to_string())));
            return;
        }
    };

    let log_path = log_file_path(&name);
    let started = Instant::now();
    let outcome = analyze_with_timeout(source, log_path, Duration::from_secs_f64(timeout));
    let elapsed = started.elapsed().as_secs_f64();
    report(&name, csv, elapsed, outcome);
}

fn report(name: &str, csv: bool, elapsed: f64, outcome: Outcome) {
    match outcome {
        Outcome::TimedOut => {
            if csv {
                println!("{name},None,None,TO");
            } else {
                println!("AST  : None");
                println!("PAST : None");
                println!("Time : TO");
            }
        }
        Outcome::Done(Ok(v)) => {
            if csv {
                println!("{name},{},{},{elapsed:.3}", v.ast, v.past);
            } else {
                println!("AST  : {}", v.ast);
                println!("PAST : {}", v.past);
                println!("Time : {elapsed:.3}s");
            }
        }
        Outcome::Done(Err(e)) => {
            eprintln!("{name}: {e}");
            if csv {
                println!("{name},None,None,{elapsed:.3}");
            } else {
                println!("AST  : None");
                println!("PAST : None");
                println!("Time : {elapsed:.3}s");
            }
        }
    }
}

fn log_file_path(stem: &str) -> PathBuf {
    let ts = chrono::Utc::now().timestamp();
    Path::new("outputs")
        .join("logs")
        .join(format!("{ts}_{stem}.log"))
}

/// Run the analysis on a worker thread and wait with a deadline. A worker
/// that misses it is left to finish detached; its result is discarded and
/// dropped with its channel.
fn analyze_with_timeout(source: String, log_path: PathBuf, timeout: Duration) -> Outcome {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = run_with_logging(&source, &log_path);
        let _ = tx.send(result);
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => Outcome::Done(result),
        Err(_) => Outcome::TimedOut,
    }
}

fn open_log_file(log_path: &Path) -> std::io::Result<fs::File> {
    if let Some(dir) = log_path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::File::create(log_path)
}

/// Run one analysis under a fresh file subscriber so every input gets its
/// own log; logging problems degrade to an unlogged run rather than
/// failing the input.
fn run_with_logging(source: &str, log_path: &Path) -> Result<Verdict, String> {
    match open_log_file(log_path) {
        Ok(file) => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("pastry=debug")),
                )
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .finish();
            tracing::subscriber::with_default(subscriber, || analyze_source(source))
                .map_err(|e| e.to_string())
        }
        Err(e) => {
            eprintln!("cannot open log file {}: {e}", log_path.display());
            analyze_source(source).map_err(|e| e.to_string())
        }
    }
}
