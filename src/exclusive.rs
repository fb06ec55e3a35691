//! Exclusive-phase and final-phase protocols.
//!
//! This is the hard part of the whole library: proving, via
//! create-or-link inode equality, that exactly one caller at a time may
//! inspect and mutate the final-lock state for a target, then materializing
//! this caller's final lock under that protection.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, trace};

use crate::backoff::{backoff_sleep, MAX_BACKOFF};
use crate::error::LockError;
use crate::names::LockNames;
use crate::scan::{scan_conflicts, Classifier};

/// Tracks which categories of lock were actually stolen over the course of
/// one `acquire` call, so the post-steal quiet period only fires when
/// something real was removed.
#[derive(Debug, Default, Clone, Copy)]
struct StealFlags {
    exclusive: bool,
    writer: bool,
    reader: bool,
}

impl StealFlags {
    fn any(self) -> bool {
        self.exclusive || self.writer || self.reader
    }
}

/// What most recently went wrong while trying to win the exclusive phase,
/// used to pick the right terminal error once `RETRY_MAX` is exhausted.
#[derive(Debug, Clone, Copy)]
enum LastFailure {
    Contended,
    ExclusiveWrite,
    InodeMismatch,
    FinalUpdate,
}

impl LastFailure {
    fn into_error(self, names: &LockNames, attempts: u32) -> LockError {
        match self {
            LastFailure::Contended => LockError::ExclusiveOpenFailed {
                target: names.exclusive.clone(),
                attempts,
            },
            LastFailure::ExclusiveWrite => LockError::ExclusiveWriteFailed {
                target: names.exclusive.clone(),
                attempts,
            },
            LastFailure::InodeMismatch => LockError::InodeMismatch {
                target: names.exclusive.clone(),
                attempts,
            },
            LastFailure::FinalUpdate => LockError::FinalUpdateFailed {
                target: names.final_lock.clone(),
                attempts,
            },
        }
    }
}

/// Runs the full acquire protocol and returns once the caller's final lock
/// is materialized, or a terminal contention/failure status.
pub(crate) fn acquire(
    names: &LockNames,
    force: bool,
    readonly: bool,
    retry_max: u32,
    lease: Duration,
) -> Result<(), LockError> {
    let link_bytes = filename_bytes(&names.exclusive_link);

    let mut steal = StealFlags::default();
    let mut last_failure = LastFailure::Contended;
    let mut attempts = 0u32;

    loop {
        if attempts >= retry_max {
            return Err(last_failure.into_error(names, attempts));
        }
        attempts += 1;

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&names.exclusive)
        {
            Ok(file) => file,
            Err(_create_err) => match open_if_ours(&names.exclusive, &link_bytes) {
                Some(file) => file,
                None => {
                    if force {
                        let _ = fs::remove_file(&names.exclusive);
                        steal.exclusive = true;
                    }
                    last_failure = LastFailure::Contended;
                    backoff_sleep(MAX_BACKOFF);
                    continue;
                }
            },
        };

        if let Err(source) = write_exclusive_record(file, &link_bytes) {
            debug!(?source, target = ?names.exclusive, "short write establishing exclusive lock");
            let _ = fs::remove_file(&names.exclusive);
            last_failure = LastFailure::ExclusiveWrite;
            backoff_sleep(MAX_BACKOFF);
            continue;
        }

        if let Err(source) = fs::hard_link(&names.exclusive, &names.exclusive_link) {
            if source.kind() != std::io::ErrorKind::AlreadyExists {
                debug!(?source, "link() returned an error other than EEXIST; relying on inode check");
            }
        }

        let stats = (
            fs::symlink_metadata(&names.exclusive),
            fs::symlink_metadata(&names.exclusive_link),
        );

        let (stat_x, stat_link) = match stats {
            (Ok(a), Ok(b)) => (a, b),
            _ => {
                let _ = fs::remove_file(&names.exclusive);
                let _ = fs::remove_file(&names.exclusive_link);
                return Err(LockError::StatFailed {
                    target: names.exclusive.clone(),
                });
            }
        };

        if stat_x.ino() != stat_link.ino() {
            let _ = fs::remove_file(&names.exclusive);
            let _ = fs::remove_file(&names.exclusive_link);
            last_failure = LastFailure::InodeMismatch;
            backoff_sleep(MAX_BACKOFF);
            continue;
        }

        // Exclusive phase won: the link name has served its purpose.
        let _ = fs::remove_file(&names.exclusive_link);

        match finish_acquire(names, force, readonly, &mut steal, attempts) {
            Ok(()) => {
                let _ = fs::remove_file(&names.exclusive);
                if force && steal.any() {
                    std::thread::sleep(lease);
                }
                return Ok(());
            }
            Err(FinishOutcome::Retry(failure)) => {
                let _ = fs::remove_file(&names.exclusive);
                last_failure = failure;
                backoff_sleep(MAX_BACKOFF);
                continue;
            }
            Err(FinishOutcome::Fatal(err)) => {
                let _ = fs::remove_file(&names.exclusive);
                return Err(err);
            }
        }
    }
}

enum FinishOutcome {
    Retry(LastFailure),
    Fatal(LockError),
}

/// Final-phase protocol. Precondition: the exclusive phase is currently
/// held (`names.exclusive` exists and we created/won it).
fn finish_acquire(
    names: &LockNames,
    force: bool,
    readonly: bool,
    steal: &mut StealFlags,
    attempts: u32,
) -> Result<(), FinishOutcome> {
    let already_own_final = fs::symlink_metadata(&names.final_lock).is_ok();

    if !already_own_final {
        let writer_scan = scan_conflicts(names, &names.final_lock, Classifier::Writer, force)
            .map_err(FinishOutcome::Fatal)?;
        steal.writer |= writer_scan.stole;
        if writer_scan.conflict {
            return Err(FinishOutcome::Fatal(LockError::HeldByWriter {
                target: names.final_lock.clone(),
            }));
        }

        let reader_scan = scan_conflicts(
            names,
            &names.final_lock,
            Classifier::Reader { readonly },
            force,
        )
        .map_err(FinishOutcome::Fatal)?;
        steal.reader |= reader_scan.stole;
        if reader_scan.conflict {
            return Err(FinishOutcome::Fatal(LockError::HeldByReader {
                target: names.final_lock.clone(),
            }));
        }
    } else {
        trace!(target = ?names.final_lock, "already hold this final lock, skipping conflict scan");
    }

    let bytes = filename_bytes(&names.final_lock);

    let mut file = match OpenOptions::new()
        .write(true)
        .create(true)
        .open(&names.final_lock)
    {
        Ok(file) => file,
        Err(_) => {
            return Err(FinishOutcome::Fatal(LockError::FinalOpenFailed {
                target: names.final_lock.clone(),
                attempts,
            }))
        }
    };

    if file.write_all(bytes.as_bytes()).is_err() {
        return Err(FinishOutcome::Retry(LastFailure::FinalUpdate));
    }

    Ok(())
}

/// If `exclusive` currently holds (all but the last byte of) `link_bytes`,
/// this caller already owns the exclusive phase: rewind and hand back the
/// open handle so the caller can rewrite it as a reassert, same as a fresh
/// create. Ignoring the last byte lets a reader-to-writer upgrade still be
/// recognized as a reassert of the same host/owner tuple.
fn open_if_ours(exclusive: &Path, link_bytes: &str) -> Option<File> {
    let mut file = OpenOptions::new().read(true).write(true).open(exclusive).ok()?;

    let mut buf = vec![0u8; link_bytes.len()];
    file.read_exact(&mut buf).ok()?;

    if !bytes_match_ignoring_last(&buf, link_bytes.as_bytes()) {
        return None;
    }

    file.seek(SeekFrom::Start(0)).ok()?;
    Some(file)
}

fn bytes_match_ignoring_last(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    a[..a.len() - 1] == b[..b.len() - 1]
}

fn write_exclusive_record(mut file: File, link_bytes: &str) -> std::io::Result<()> {
    file.write_all(link_bytes.as_bytes())
}

fn filename_bytes(path: &Path) -> String {
    path.file_name()
        .expect("lock names always have a filename component")
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn reassert_byte_compare_ignores_last_byte() {
        assert!(bytes_match_ignoring_last(b"f.xenlk.host.001.xw", b"f.xenlk.host.001.xr"));
        assert!(!bytes_match_ignoring_last(b"f.xenlk.host.001.xw", b"f.xenlk.host.002.xw"));
        assert!(!bytes_match_ignoring_last(b"short", b"longer-name"));
    }

    #[test]
    fn filename_bytes_extracts_basename() {
        assert_eq!(filename_bytes(&PathBuf::from("/a/b/f.xenlk")), "f.xenlk");
    }
}
