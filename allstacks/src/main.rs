//! # allstacks - Demo Entry Point
//!
//! Spawns a few busy worker threads (`foo → bar → baz`), captures every
//! thread of the process once and prints the result as text or JSON.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::hint::black_box;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};

use allstacks::cli::Args;
use allstacks::{BacktraceCollector, ThreadBacktrace};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.capture_config();
    debug!("Capture configuration: {config:?}");

    let stop = Arc::new(AtomicBool::new(false));
    let workers = spawn_workers(args.workers, &stop)?;

    let collector = BacktraceCollector::new(&config);
    let threads = collector.capture_threads();

    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        if worker.join().is_err() {
            anyhow::bail!("A worker thread panicked");
        }
    }

    if !args.quiet {
        let failed = threads.iter().filter(|t| t.error.is_some()).count();
        info!("Captured {} threads ({failed} failed)", threads.len());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &threads).context("Failed to write JSON")?;
        writeln!(out)?;
    } else {
        print_text(&mut out, &collector, &threads, args.quiet)?;
    }
    out.flush()?;

    Ok(())
}

fn print_text(
    out: &mut impl Write,
    collector: &BacktraceCollector,
    threads: &[ThreadBacktrace],
    quiet: bool,
) -> io::Result<()> {
    for thread in threads {
        let name = if thread.name.is_empty() { "<unnamed>" } else { &thread.name };
        writeln!(out, "{} ({name})", thread.tid)?;
        if let Some(error) = &thread.error {
            if !quiet {
                writeln!(out, "    capture failed: {error}")?;
            }
        }
        for line in collector.render(&thread.frames) {
            writeln!(out, "{line}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Spawn `count` workers and wait until each has entered its loop
fn spawn_workers(count: usize, stop: &Arc<AtomicBool>) -> Result<Vec<JoinHandle<()>>> {
    let ready = Arc::new(Barrier::new(count + 1));
    let workers = (0..count)
        .map(|i| {
            let stop = Arc::clone(stop);
            let ready = Arc::clone(&ready);
            thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    ready.wait();
                    black_box(foo(&stop));
                })
                .with_context(|| format!("Failed to spawn worker-{i}"))
        })
        .collect::<Result<Vec<_>>>()?;

    ready.wait();
    debug!("{count} workers running");
    Ok(workers)
}

#[inline(never)]
fn foo(stop: &AtomicBool) -> u64 {
    black_box(bar(stop))
}

#[inline(never)]
fn bar(stop: &AtomicBool) -> u64 {
    black_box(baz(stop))
}

#[inline(never)]
fn baz(stop: &AtomicBool) -> u64 {
    let mut spins = 0u64;
    while !stop.load(Ordering::Relaxed) {
        spins = black_box(spins.wrapping_add(1));
        std::hint::spin_loop();
    }
    spins
}
