//! Deterministic auxiliary filenames.
//!
//! Every contender racing on the same target must independently compute
//! identical names; there is no handshake to agree on them.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::LockError;

const EXCLUSIVE_SUFFIX: &str = ".xenlk";

/// Local hostname, bounded to 128 bytes as the protocol requires.
///
/// Truncation, rather than rejecting long hostnames, keeps names
/// reproducible: every contender on a given host truncates identically.
pub(crate) fn local_hostname() -> Result<String, LockError> {
    let raw = hostname::get().map_err(LockError::Hostname)?;
    let lossy = raw.to_string_lossy().into_owned();
    let bytes = lossy.as_bytes();
    let cut = bytes.len().min(128);
    Ok(String::from_utf8_lossy(&bytes[..cut]).into_owned())
}

/// The three deterministic auxiliary paths for a target/owner/mode tuple.
#[derive(Debug, Clone)]
pub(crate) struct LockNames {
    /// The caller-nominated target path itself, kept around so the
    /// directory scanner and `age` can recompute its directory/basename.
    pub target: PathBuf,
    /// `T + ".xenlk"`, the exclusive-phase file.
    pub exclusive: PathBuf,
    /// `T + ".xenlk.<host>.<owner>.x{r,w}"`, the exclusive-phase link name.
    pub exclusive_link: PathBuf,
    /// `T + ".xenlk.<host>.<owner>.f{r,w}"`, the final lock name.
    pub final_lock: PathBuf,
}

impl LockNames {
    pub fn compute(target: &Path, owner: &str, readonly: bool) -> Result<Self, LockError> {
        if owner.is_empty() {
            return Err(LockError::BadParameter);
        }

        let host = local_hostname()?;
        let mode = if readonly { "r" } else { "w" };
        let base = target.to_string_lossy().into_owned();

        Ok(LockNames {
            target: target.to_path_buf(),
            exclusive: PathBuf::from(format!("{base}{EXCLUSIVE_SUFFIX}")),
            exclusive_link: PathBuf::from(format!(
                "{base}{EXCLUSIVE_SUFFIX}.{host}.{owner}.x{mode}"
            )),
            final_lock: PathBuf::from(format!(
                "{base}{EXCLUSIVE_SUFFIX}.{host}.{owner}.f{mode}"
            )),
        })
    }
}

/// The final path component of `path`, or the whole path if it has none
/// (e.g. `.` or `/`).
pub(crate) fn basename(path: &Path) -> OsString {
    path.file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| path.as_os_str().to_os_string())
}

/// `target`'s parent directory, or `.` if it names a bare filename.
pub(crate) fn containing_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
