//! Test harness CLI for the `xenlk` locking library. Not part of the
//! library contract, just a tool for driving and exercising it manually.

mod soak;

use std::env;
use std::path::Path;
use std::process::ExitCode;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::{EnvFilter, Layer as _, Registry};

fn main() -> ExitCode {
    setup_tracing();

    let mut args = env::args().skip(1);

    let Some(subcommand) = args.next() else {
        usage();
        return ExitCode::FAILURE;
    };

    match subcommand.as_str() {
        "l" => cmd_lock(args),
        "u" => cmd_unlock(args),
        "d" => cmd_age(args),
        "t" => soak::verify_counter_file(args),
        "r" => soak::random_locks(args),
        "p" => soak::perf_lock(args),
        _ => {
            usage();
            ExitCode::FAILURE
        }
    }
}

fn setup_tracing() {
    let logger = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(env::var("RUSTDN_LOCK_LOG").as_deref().unwrap_or(""));

    let console_logger = logger.compact().with_filter(env_filter).boxed();
    let subscriber = Registry::default().with(console_logger);

    tracing::subscriber::set_global_default(subscriber).unwrap();
}

fn usage() {
    eprintln!(
        "usage:\n\
         \u{20}  xenlk d <file>                        lock delta (age)\n\
         \u{20}  xenlk t <file>                        verify a counter file written by `r`\n\
         \u{20}  xenlk r <file>                        randomized soak test (^C to stop)\n\
         \u{20}  xenlk p <file> [iterations]           perf loop: acquire/reassert in a tight loop\n\
         \u{20}  xenlk u <file> [readonly 0|1] [owner]\n\
         \u{20}  xenlk l <file> [readonly 0|1] [force 0|1] [owner]\n\
         \n\
         owner defaults to the current pid, zero-padded to 8 digits."
    );
}

fn default_owner() -> String {
    format!("{:08}", std::process::id())
}

/// `l <file> [readonly] [force] [owner]`.
///
/// NOTE: this argv order puts `readonly` before `force`, the reverse of
/// the library's own `(force, readonly)` parameter order. The call below
/// still passes `(force, readonly)` to the library; only these argv
/// positions keep the older, arguably backwards, order.
fn cmd_lock(mut args: impl Iterator<Item = String>) -> ExitCode {
    let Some(file) = args.next() else {
        eprintln!("xenlk l: missing <file>");
        return ExitCode::FAILURE;
    };

    let readonly = args.next().is_some_and(|s| s == "1");
    let force = args.next().is_some_and(|s| s == "1");
    let owner = args.next().unwrap_or_else(default_owner);

    match xenlk::acquire(Path::new(&file), &owner, force, readonly) {
        Ok(()) => {
            println!("lock status = OK");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("lock status = {err}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_unlock(mut args: impl Iterator<Item = String>) -> ExitCode {
    let Some(file) = args.next() else {
        eprintln!("xenlk u: missing <file>");
        return ExitCode::FAILURE;
    };

    let readonly = args.next().is_some_and(|s| s == "1");
    let owner = args.next().unwrap_or_else(default_owner);

    match xenlk::release(Path::new(&file), &owner, readonly) {
        Ok(()) => {
            println!("unlock status = OK");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("unlock status = {err}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_age(mut args: impl Iterator<Item = String>) -> ExitCode {
    let Some(file) = args.next() else {
        eprintln!("xenlk d: missing <file>");
        return ExitCode::FAILURE;
    };

    match xenlk::age(Path::new(&file)) {
        Ok(delta) => {
            println!("lock delta for {file} is {} seconds", delta.as_secs());
            ExitCode::SUCCESS
        }
        Err(xenlk::LockError::NoLockPresent { .. }) => {
            println!("lock delta for {file}: no lock");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("lock delta for {file}: error: {err}");
            ExitCode::FAILURE
        }
    }
}
