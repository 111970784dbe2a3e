//! Filesystem helpers used during startup.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Write `data` to `path` so that only the owning user can read or write it.
///
/// Parent directories are created as needed. An existing file is truncated
/// and its permissions are reset to `0600`.
pub async fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o600);

    let mut file = opts.open(path).await?;
    file.write_all(data).await?;
    file.flush().await?;

    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    debug!(path = %path.display(), bytes = data.len(), "private file written");
    Ok(())
}
