//! Where oversized form files are spooled.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWrite;
use tracing::trace;

const MAX_CREATE_ATTEMPTS: usize = 16;

/// File system access used while reading a form.
///
/// [`FsTempStorage`] is the real implementation; tests plug in fakes to
/// observe or break file handling.
#[trait_variant::make(TempStorage: Send)]
pub trait LocalTempStorage {
    type File: AsyncWrite + Unpin + Send;

    /// Creates a new file named `{prefix}{random}{suffix}` inside `dir`.
    async fn create(&self, dir: &Path, prefix: &str, suffix: &str) -> io::Result<(PathBuf, Self::File)>;

    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Temp files on the local file system through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTempStorage;

impl TempStorage for FsTempStorage {
    type File = File;

    async fn create(&self, dir: &Path, prefix: &str, suffix: &str) -> io::Result<(PathBuf, File)> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let path = dir.join(format!("{prefix}{:016x}{suffix}", fastrand::u64(..)));
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => {
                    trace!(path = %path.display(), "created temp file");
                    return Ok((path, file));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(io::ErrorKind::AlreadyExists, "no unused temp file name found"))
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }
}
