//! Advisory, filesystem-only readers/writer locking for a target resource
//! shared by independent processes, possibly on different hosts, over a
//! POSIX-compatible shared directory (NFS and similar).
//!
//! No kernel lock state is used: `flock`/`fcntl` locks are unreliable
//! across network filesystems. Instead mutual exclusion is built entirely
//! from atomic file creation (`O_CREAT|O_EXCL`), hard linking, and inode
//! identity, the "dot locking" scheme this crate implements.
//!
//! Three operations on a target path `T`:
//! - [`acquire`] takes a reader or writer lock, with optional forced steal
//!   of a conflicting lock.
//! - [`release`] drops a previously acquired lock; idempotent.
//! - [`age`] reports how long it's been since `T`'s lock state last changed.
//!
//! All state lives in sibling files next to `T`; nothing survives in
//! memory across calls. See [`names`] for the exact on-disk layout.

mod age;
mod backoff;
mod error;
mod exclusive;
mod names;
mod scan;

use std::path::Path;
use std::time::Duration;

pub use error::LockError;

/// Maximum number of exclusive-phase attempts before giving up.
pub const RETRY_MAX: u32 = 16;

/// Quiet period observed after a forced steal succeeds, before returning to
/// the caller. Gives the former holder a chance to notice its lock is gone.
pub const LEASE_TIME_SECS: u64 = 5;

/// Per-call overrides of the module-level tunables.
///
/// Primarily useful in tests, which can't afford to wait out the real
/// [`LEASE_TIME_SECS`] after every forced steal.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub retry_max: u32,
    pub lease: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            retry_max: RETRY_MAX,
            lease: Duration::from_secs(LEASE_TIME_SECS),
        }
    }
}

/// Acquires a reader or writer lock on `target` for `owner`.
///
/// `owner` is an opaque, caller-chosen, non-empty identifier; the triple
/// `(local hostname, owner, readonly)` must uniquely identify this lock
/// instance among concurrent callers; reusing a triple while a prior
/// instance is still live is undefined behavior, observed as an erroneous
/// reassert.
///
/// `force` steals any conflicting locks held by other owners instead of
/// reporting a conflict. `readonly` selects the reader discipline: any
/// number of readers may coexist, but a writer excludes everyone and is
/// excluded by everyone.
///
/// Calling `acquire` again with the same `(target, owner, readonly)` while
/// still holding the lock is a reassert: it refreshes the lock's mtime and
/// always succeeds without touching other owners' locks.
pub fn acquire(target: &Path, owner: &str, force: bool, readonly: bool) -> Result<(), LockError> {
    acquire_with_options(target, owner, force, readonly, LockOptions::default())
}

/// As [`acquire`], with explicit tunables in place of the crate defaults.
pub fn acquire_with_options(
    target: &Path,
    owner: &str,
    force: bool,
    readonly: bool,
    options: LockOptions,
) -> Result<(), LockError> {
    let names = names::LockNames::compute(target, owner, readonly)?;
    exclusive::acquire(&names, force, readonly, options.retry_max, options.lease)
}

/// Releases `owner`'s lock on `target`.
///
/// Idempotent: releasing a lock that isn't held, because it was never
/// acquired, already released, or stolen by a forcing acquire, still
/// returns `Ok`.
pub fn release(target: &Path, owner: &str, readonly: bool) -> Result<(), LockError> {
    let names = names::LockNames::compute(target, owner, readonly)?;
    match std::fs::remove_file(&names.final_lock) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io(source)),
    }
}

/// Returns the time elapsed since the most recently updated final lock on
/// `target`, or [`LockError::NoLockPresent`] if `target` currently has no
/// live locks.
pub fn age(target: &Path) -> Result<Duration, LockError> {
    age::age(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Instant;

    fn fast_lease(millis: u64) -> LockOptions {
        LockOptions {
            retry_max: RETRY_MAX,
            lease: Duration::from_millis(millis),
        }
    }

    fn final_lock_names(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".fw") || n.ends_with(".fr"))
            .collect()
    }

    fn xenlk_entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".xenlk"))
            .collect()
    }

    #[test]
    fn s1_single_writer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, false).unwrap();

        let finals = final_lock_names(dir.path());
        assert_eq!(finals.len(), 1);
        assert!(finals[0].ends_with(".001.fw"));

        release(&target, "001", false).unwrap();
        assert!(xenlk_entries(dir.path()).is_empty());
    }

    #[test]
    fn s2_two_readers_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, true).unwrap();
        acquire(&target, "002", false, true).unwrap();

        let readers: Vec<_> = final_lock_names(dir.path())
            .into_iter()
            .filter(|n| n.ends_with(".fr"))
            .collect();
        assert_eq!(readers.len(), 2);
    }

    #[test]
    fn s3_writer_blocks_reader() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, false).unwrap();

        let err = acquire(&target, "002", false, true).unwrap_err();
        assert!(matches!(err, LockError::HeldByWriter { .. }));
    }

    #[test]
    fn s4_reader_blocks_writer() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, true).unwrap();
        acquire(&target, "002", false, true).unwrap();

        let err = acquire(&target, "003", false, false).unwrap_err();
        assert!(matches!(err, LockError::HeldByReader { .. }));
    }

    #[test]
    fn s5_reassert_refreshes_mtime_and_stays_single() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, false).unwrap();
        let lock_path = dir.path().join(&final_lock_names(dir.path())[0]);
        let mtime_before = fs::symlink_metadata(&lock_path).unwrap().mtime();

        thread::sleep(Duration::from_secs(1));
        acquire(&target, "001", false, false).unwrap();

        let mtime_after = fs::symlink_metadata(&lock_path).unwrap().mtime();
        assert!(mtime_after >= mtime_before);
        assert_eq!(final_lock_names(dir.path()).len(), 1);
    }

    #[test]
    fn s6_force_steals_foreign_lock_after_quiet_period() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, false).unwrap();

        let started = Instant::now();
        acquire_with_options(&target, "002", true, false, fast_lease(200)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));

        let finals = final_lock_names(dir.path());
        assert_eq!(finals.len(), 1);
        assert!(finals[0].contains(".002."));
    }

    #[test]
    fn s7_age_reports_elapsed_seconds_then_no_lock() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, false).unwrap();
        thread::sleep(Duration::from_secs(2));

        let elapsed = age(&target).unwrap();
        assert!(elapsed.as_secs() <= 3);

        release(&target, "001", false).unwrap();
        assert!(matches!(age(&target), Err(LockError::NoLockPresent { .. })));
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        release(&target, "001", false).unwrap();
        release(&target, "001", false).unwrap();
    }

    #[test]
    fn bad_parameter_on_empty_owner() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        assert!(matches!(
            acquire(&target, "", false, false),
            Err(LockError::BadParameter)
        ));
    }

    #[test]
    fn no_residue_after_failed_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f");

        acquire(&target, "001", false, false).unwrap();
        assert!(acquire(&target, "002", false, false).is_err());

        let stray: Vec<_> = xenlk_entries(dir.path())
            .into_iter()
            .filter(|n| n.contains(".002."))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn concurrent_writers_exactly_one_wins() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(dir.path().join("f"));
        let successes = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let target = Arc::clone(&target);
                let successes = Arc::clone(&successes);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if acquire(&target, &format!("owner-{i}"), false, false).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_readers_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(dir.path().join("f"));
        let successes = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let target = Arc::clone(&target);
                let successes = Arc::clone(&successes);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if acquire(&target, &format!("owner-{i}"), false, true).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 6);
    }
}
