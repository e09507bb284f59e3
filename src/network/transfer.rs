//! Idempotent file uploads.

use super::{FileKind, Transport};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// What [put] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// The file was copied to the contained remote path.
    Uploaded(String),

    /// A file already existed at the contained remote path, so nothing was copied.
    Skipped(String),
}

/// Uploads the local file `local` to `target` on the remote host behind `transport`.
///
/// `destination` only serves to make log lines and errors readable.
///
/// # Target resolution
///
/// A leading `~` or `~/` in `target` is replaced with the remote home directory; `~user` is left
/// for the remote side to deal with. If `target` names an existing directory, the file keeps its
/// base name inside that directory.
///
/// # Idempotence
///
/// If a file already exists at the final path, the upload is skipped with an informational
/// message. Only a missing file triggers a copy; nothing compares contents or sizes. A copy that
/// fails halfway leaves whatever the copy left behind, and a later [put] will then skip it, so the
/// remedy for a failed upload is to remove the partial file and run the action again.
///
/// # Errors
///
/// Returns [Error::Transfer] if the remote host can't be queried or the copy fails.
pub fn put(
    transport: &mut dyn Transport,
    destination: &str,
    local: &Path,
    target: &str,
) -> Result<Transfer> {
    let transfer_error = |reason: String| Error::Transfer {
        local: local.display().to_string(),
        remote: format!("{destination}:{target}"),
        reason,
    };

    let file_name = local
        .file_name()
        .ok_or_else(|| transfer_error("the local path has no file name".to_string()))?
        .to_string_lossy()
        .into_owned();

    let mut path = match target.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = transport.home().map_err(|e| transfer_error(e.to_string()))?;
            format!("{}{rest}", home.trim_end_matches('/'))
        }
        _ => target.to_string(),
    };

    let kind = transport
        .stat(&path)
        .map_err(|e| transfer_error(e.to_string()))?;
    if kind == Some(FileKind::Directory) {
        path = join(&path, &file_name);
    }

    match transport
        .stat(&path)
        .map_err(|e| transfer_error(e.to_string()))?
    {
        Some(_) => {
            info!("[INFO] {file_name} already uploaded, skipping.");
            Ok(Transfer::Skipped(path))
        }
        None => {
            info!("PUT {} -> {destination}:{path}", local.display());
            transport
                .copy(local, &path)
                .map_err(|e| transfer_error(e.to_string()))?;
            Ok(Transfer::Uploaded(path))
        }
    }
}

/// Joins a remote directory and a file name with exactly one slash.
fn join(directory: &str, file_name: &str) -> String {
    let mut path = PathBuf::from(directory);
    path.push(file_name);
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod test;
