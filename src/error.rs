use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Status taxonomy for the locking protocol.
///
/// Each variant corresponds to a distinct outcome of `acquire`/`release`/
/// `age`. `HeldByWriter`/`HeldByReader` are contention outcomes, not I/O
/// failures, and callers are expected to match on them rather than treat
/// them as fatal. The `*Failed` variants surface only once `RETRY_MAX`
/// attempts are exhausted; transient occurrences drive a retry internally.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("owner id must not be empty")]
    BadParameter,

    #[error("exclusive lock busy for {target:?} after {attempts} attempts")]
    ExclusiveOpenFailed { target: PathBuf, attempts: u32 },

    #[error("could not write exclusive lock record for {target:?} after {attempts} attempts")]
    ExclusiveWriteFailed { target: PathBuf, attempts: u32 },

    #[error("stat failed establishing exclusive phase for {target:?}")]
    StatFailed { target: PathBuf },

    #[error("inode mismatch establishing exclusive phase for {target:?} after {attempts} attempts")]
    InodeMismatch { target: PathBuf, attempts: u32 },

    #[error("{target:?} is held by a writer")]
    HeldByWriter { target: PathBuf },

    #[error("{target:?} is held by a reader")]
    HeldByReader { target: PathBuf },

    #[error("could not open final lock file for {target:?} after {attempts} attempts")]
    FinalOpenFailed { target: PathBuf, attempts: u32 },

    #[error("could not write final lock record for {target:?} after {attempts} attempts")]
    FinalUpdateFailed { target: PathBuf, attempts: u32 },

    #[error("no lock present for {target:?}")]
    NoLockPresent { target: PathBuf },

    #[error("failed to resolve local hostname: {0}")]
    Hostname(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
