//! Staleness query: how long since a target's lock state last changed.

use std::fs::{self, File};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Duration;

use rand::Rng;

use crate::error::LockError;
use crate::names::{basename, containing_dir};

/// Returns the minimum `(now - mtime)` across all final-lock siblings of
/// `target`, or [`LockError::NoLockPresent`] if none exist.
///
/// The anchor file is named with the `.xenlk` prefix required of
/// everything this library creates, so a crash mid-call still leaves a
/// recognizable, cleanable residue rather than a stray temp file.
pub(crate) fn age(target: &Path) -> Result<Duration, LockError> {
    let dir = containing_dir(target);
    let target_name = basename(target);
    let prefix = target_name.to_string_lossy().into_owned();

    let anchor_name = format!(
        "{prefix}.xenlk.{}.{:06x}.tmp",
        std::process::id(),
        rand::thread_rng().gen::<u32>() & 0x00ff_ffff
    );
    let anchor_path = dir.join(&anchor_name);

    File::create(&anchor_path)?;
    let now = fs::symlink_metadata(&anchor_path);
    let _ = fs::remove_file(&anchor_path);
    let now_mtime = now?.mtime();

    let mut best: Option<i64> = None;

    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();

        if name == target_name {
            continue;
        }

        let name_str = name.to_string_lossy();
        if !name_str.starts_with(prefix.as_str()) {
            continue;
        }

        let Ok(meta) = fs::symlink_metadata(dir.join(&name)) else {
            continue;
        };

        // Clamp negatives: a concurrent reassert between anchoring `now` and
        // stat-ing this entry can otherwise make the delta appear negative.
        let diff = (now_mtime - meta.mtime()).max(0);
        best = Some(best.map_or(diff, |b: i64| b.min(diff)));
    }

    match best {
        Some(seconds) => Ok(Duration::from_secs(seconds as u64)),
        None => Err(LockError::NoLockPresent {
            target: target.to_path_buf(),
        }),
    }
}
