//! Soak, perf, and verify subcommands for exercising the locking protocol
//! under concurrent and repeated load.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::{info, warn};

/// `t <file>`: verifies a counter file written by [`random_locks`] under
/// writer locks. Each line is `<count> <pid> <time>` and `count` must
/// increase strictly by one across writer visits, with no duplicates or
/// gaps, proving writers never interleaved.
pub(crate) fn verify_counter_file(mut args: impl Iterator<Item = String>) -> ExitCode {
    let Some(file) = args.next() else {
        eprintln!("xenlk t: missing <file>");
        return ExitCode::FAILURE;
    };

    let contents = match std::fs::read_to_string(&file) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("xenlk t: failed to read {file}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut expected = 0u64;
    let mut ok = true;

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(count_field), Some(_pid), Some(_time)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        let Ok(count) = count_field.parse::<u64>() else {
            continue;
        };

        if count != expected {
            println!("ERROR: prev_count={expected}, count={count}");
            ok = false;
        }

        expected = count + 1;
    }

    if ok {
        println!("counter file {file} is consistent ({expected} entries)");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// `r <file>`: forever alternates random readonly/writer acquires,
/// appending a `count pid time` line under writer locks, until killed.
/// This will never return on its own; kill it to stop.
pub(crate) fn random_locks(mut args: impl Iterator<Item = String>) -> ExitCode {
    let Some(file) = args.next() else {
        eprintln!("xenlk r: missing <file>");
        return ExitCode::FAILURE;
    };

    let pid = std::process::id();
    let owner = format!("{pid:08}");
    info!(pid, file = %file, "starting randomized soak test, ^C to stop");

    loop {
        micro_sleep();
        let readonly = rand::thread_rng().gen_bool(0.5);

        match xenlk::acquire(Path::new(&file), &owner, false, readonly) {
            Ok(()) => {
                if !readonly {
                    if let Err(err) = append_counter_entry(&file, pid) {
                        warn!(?err, "failed to append counter entry");
                    }
                }
                micro_sleep();
                if let Err(err) = xenlk::release(Path::new(&file), &owner, readonly) {
                    warn!(?err, "unlock failed");
                }
            }
            Err(err) => warn!(?err, "lock attempt failed"),
        }
    }
}

fn append_counter_entry(file: &str, pid: u32) -> std::io::Result<()> {
    let mut handle = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(file)?;

    let mut tail = String::new();
    let len = handle.metadata()?.len();
    handle.seek(SeekFrom::Start(len.saturating_sub(256)))?;
    handle.read_to_string(&mut tail)?;

    let count = tail
        .lines()
        .last()
        .and_then(|line| line.split_whitespace().next())
        .and_then(|field| field.parse::<u64>().ok())
        .map_or(0, |c| c + 1);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    handle.seek(SeekFrom::End(0))?;
    writeln!(handle, "{count} {pid} {now}")?;
    Ok(())
}

fn micro_sleep() {
    let micros = rand::thread_rng().gen_range(0..0x7_ffff_u64);
    std::thread::sleep(Duration::from_micros(micros));
}

/// `p <file> [iterations]`: repeatedly acquire/reassert a writer lock
/// without releasing in between, then release once at the end and report
/// elapsed time. A throughput probe, not a correctness test.
pub(crate) fn perf_lock(mut args: impl Iterator<Item = String>) -> ExitCode {
    let Some(file) = args.next() else {
        eprintln!("xenlk p: missing <file>");
        return ExitCode::FAILURE;
    };

    let iterations: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(100_000);
    let owner = format!("{:08}", std::process::id());

    let start = Instant::now();
    for i in 0..iterations {
        if let Err(err) = xenlk::acquire(Path::new(&file), &owner, false, false) {
            println!("failed to get lock at iteration {i}: {err}");
            return ExitCode::FAILURE;
        }
    }
    let elapsed = start.elapsed();

    if let Err(err) = xenlk::release(Path::new(&file), &owner, false) {
        warn!(?err, "final unlock failed");
    }

    let rate = iterations as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("{iterations} iterations in {elapsed:?} ({rate:.1} locks/sec)");
    ExitCode::SUCCESS
}
