//! Directory scanner: enumerates siblings of a target path and classifies
//! them as conflicting reader/writer locks, or removes them unconditionally
//! when forcing.

use std::fs;

use tracing::warn;

use crate::error::LockError;
use crate::names::{basename, containing_dir, LockNames};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Classifier {
    /// Matches any sibling whose basename ends in `w`.
    Writer,
    /// Matches siblings ending in `r`, unless the caller itself is readonly
    /// (readers tolerate other readers).
    Reader { readonly: bool },
}

impl Classifier {
    fn matches(self, name: &str) -> bool {
        match self {
            Classifier::Writer => name.ends_with('w'),
            Classifier::Reader { readonly } => !readonly && name.ends_with('r'),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ScanOutcome {
    pub conflict: bool,
    pub stole: bool,
}

/// Scans `names.target`'s directory for sibling lock files.
///
/// Entries equal to the basename of `names.target`, `names.exclusive`, or
/// `reference` (typically the caller's own final lock name) are ignored.
/// Without this exclusion set, a caller's own final lock, or the
/// exclusive-phase file it currently holds, would trigger a self-conflict
/// (the writer classifier matches the caller's own `.fw` file just as
/// readily as a foreign one).
///
/// When `force`, every other matching entry is unlinked unconditionally and
/// `stole` is set; individual unlink failures are logged and otherwise
/// ignored. Otherwise, the first entry matching `classifier` short-circuits
/// with `conflict = true`.
pub(crate) fn scan_conflicts(
    names: &LockNames,
    reference: &std::path::Path,
    classifier: Classifier,
    force: bool,
) -> Result<ScanOutcome, LockError> {
    let dir = containing_dir(&names.target);
    let target_name = basename(&names.target);
    let exclusive_name = basename(&names.exclusive);
    let reference_name = basename(reference);
    let prefix = target_name.to_string_lossy().into_owned();

    let mut outcome = ScanOutcome::default();

    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();

        if name == target_name || name == exclusive_name || name == reference_name {
            continue;
        }

        let name_str = name.to_string_lossy();
        if !name_str.starts_with(prefix.as_str()) {
            continue;
        }

        if force {
            if let Err(err) = fs::remove_file(dir.join(&name)) {
                warn!(error = %err, name = %name_str, "failed to unlink foreign lock file while stealing");
            }
            outcome.stole = true;
            continue;
        }

        if classifier.matches(&name_str) {
            outcome.conflict = true;
            return Ok(outcome);
        }
    }

    Ok(outcome)
}
