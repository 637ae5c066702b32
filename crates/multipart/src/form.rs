//! Reading a whole `multipart/form-data` body into a [`MultipartForm`].

use std::collections::HashMap;
use std::io;
use std::mem;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use micro_bufio::BufWriter;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::reader::{MultipartReader, Part};
use crate::storage::{FsTempStorage, TempStorage};
use crate::MultipartError;

const DEFAULT_MAX_MEMORY: u64 = 10 << 20;
/// Extra allowance for plain values on top of the file memory budget.
const VALUE_ALLOWANCE: u64 = 10 << 20;
const DEFAULT_PREFIX: &str = "multipart-";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Limits and spooling location for [`MultipartReader::read_form`].
#[derive(Debug, Clone)]
pub struct FormOptions {
    max_memory: u64,
    max_value_bytes: Option<u64>,
    dir: PathBuf,
    prefix: String,
    suffix: Option<String>,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY,
            max_value_bytes: None,
            dir: std::env::temp_dir(),
            prefix: DEFAULT_PREFIX.to_string(),
            suffix: None,
        }
    }
}

impl FormOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes of file content kept in memory; larger files go to disk.
    #[must_use]
    pub fn max_memory(mut self, max_memory: u64) -> Self {
        self.max_memory = max_memory;
        self
    }

    /// Total bytes of plain values, `max_memory` plus 10 MiB unless set.
    #[must_use]
    pub fn max_value_bytes(mut self, max_value_bytes: u64) -> Self {
        self.max_value_bytes = Some(max_value_bytes);
        self
    }

    #[must_use]
    pub fn dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dir = dir.into();
        self
    }

    #[must_use]
    pub fn prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Temp file suffix; by default the extension of the uploaded file name.
    #[must_use]
    pub fn suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    fn value_budget(&self) -> u64 {
        self.max_value_bytes.unwrap_or_else(|| self.max_memory.saturating_add(VALUE_ALLOWANCE))
    }

    fn suffix_for(&self, file_name: &str) -> String {
        if let Some(suffix) = &self.suffix {
            return suffix.clone();
        }
        Path::new(file_name).extension().map(|ext| format!(".{}", ext.to_string_lossy())).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Memory(Bytes),
    /// Spooled to disk. The file stays until [`MultipartForm::remove_all`].
    TempFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFile {
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub data: FileData,
}

impl FormFile {
    pub fn temp_file(&self) -> Option<&Path> {
        match &self.data {
            FileData::TempFile(path) => Some(path),
            FileData::Memory(_) => None,
        }
    }
}

/// Fields and files of a form, keyed by field name in arrival order.
#[derive(Debug, Default)]
pub struct MultipartForm {
    values: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<FormFile>>,
}

impl MultipartForm {
    /// First value of field `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|values| values.first()).map(String::as_str)
    }

    pub fn values(&self) -> &HashMap<String, Vec<String>> {
        &self.values
    }

    /// First file of field `name`.
    pub fn file(&self, name: &str) -> Option<&FormFile> {
        self.files.get(name).and_then(|files| files.first())
    }

    pub fn files(&self) -> &HashMap<String, Vec<FormFile>> {
        &self.files
    }

    fn temp_files(&self) -> impl Iterator<Item = &Path> {
        self.files.values().flatten().filter_map(FormFile::temp_file)
    }

    /// Deletes every spooled temp file.
    ///
    /// Files that are already gone are ignored; the first other failure is
    /// returned after all removals were attempted.
    pub async fn remove_all(&self) -> io::Result<()> {
        self.remove_all_with(&FsTempStorage).await
    }

    pub async fn remove_all_with<S: TempStorage>(&self, storage: &S) -> io::Result<()> {
        let mut result = Ok(());
        for path in self.temp_files() {
            match storage.remove(path).await {
                Ok(()) => debug!(path = %path.display(), "removed temp file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), cause = %e, "failed to remove temp file");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    /// Wraps the form so its temp files are deleted when the guard is dropped.
    pub fn into_guard(self) -> FormGuard {
        FormGuard { form: self }
    }
}

/// Owns a [`MultipartForm`] and removes its temp files on drop.
#[derive(Debug)]
pub struct FormGuard {
    form: MultipartForm,
}

impl FormGuard {
    /// Gives the form back; its temp files are no longer removed automatically.
    pub fn into_inner(mut self) -> MultipartForm {
        mem::take(&mut self.form)
    }
}

impl Deref for FormGuard {
    type Target = MultipartForm;

    fn deref(&self) -> &MultipartForm {
        &self.form
    }
}

impl Drop for FormGuard {
    fn drop(&mut self) {
        for path in self.form.temp_files() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed temp file on drop"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), cause = %e, "failed to remove temp file on drop"),
            }
        }
    }
}

impl<R: AsyncRead + Unpin> MultipartReader<R> {
    /// Reads every remaining part into a form, spooling large files to disk.
    pub async fn read_form(&mut self, options: &FormOptions) -> Result<MultipartForm, MultipartError> {
        self.read_form_with(options, &FsTempStorage).await
    }

    /// Like [`read_form`](Self::read_form) with temp files created through `storage`.
    ///
    /// Parts without a `name` are skipped. Plain values count against the
    /// value budget, files against the memory budget; a file over the
    /// remaining memory budget is written to a temp file. On failure every
    /// temp file created so far is left to the caller except the one being
    /// written, which is removed.
    pub async fn read_form_with<S: TempStorage>(&mut self, options: &FormOptions, storage: &S) -> Result<MultipartForm, MultipartError> {
        let mut form = MultipartForm::default();
        let mut max_value_bytes = options.value_budget();
        let mut max_memory = options.max_memory;

        while let Some(mut part) = self.next_part().await? {
            let Some(name) = part.form_name().map(str::to_string) else {
                debug!("skip multipart part without a name");
                continue;
            };
            let mut buf = BytesMut::new();

            let Some(file_name) = part.file_name().map(str::to_string) else {
                let n = part.read_limited(&mut buf, max_value_bytes.saturating_add(1)).await?;
                if n > max_value_bytes {
                    return Err(MultipartError::MessageTooLarge);
                }
                max_value_bytes -= n;
                form.values.entry(name).or_default().push(String::from_utf8_lossy(&buf).into_owned());
                continue;
            };

            let content_type = part.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
            let n = part.read_limited(&mut buf, max_memory.saturating_add(1)).await?;

            let (size, data) = if n > max_memory {
                let suffix = options.suffix_for(&file_name);
                let (path, file) = storage.create(&options.dir, &options.prefix, &suffix).await?;
                debug!(field = %name, path = %path.display(), "spooling form file to disk");

                match spool(&mut part, &buf, file).await {
                    Ok(size) => (size, FileData::TempFile(path)),
                    Err(e) => {
                        if let Err(remove_err) = storage.remove(&path).await {
                            warn!(path = %path.display(), cause = %remove_err, "failed to remove partial temp file");
                        }
                        return Err(e);
                    }
                }
            } else {
                max_memory -= n;
                max_value_bytes = max_value_bytes.saturating_sub(n);
                (n, FileData::Memory(buf.freeze()))
            };

            form.files.entry(name).or_default().push(FormFile { file_name, content_type, size, data });
        }

        Ok(form)
    }
}

/// Writes `prefix` and the rest of `part` to `file`, returning the total size.
async fn spool<R, F>(part: &mut Part<'_, R>, prefix: &[u8], file: F) -> Result<u64, MultipartError>
where
    R: AsyncRead + Unpin,
    F: tokio::io::AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(file);
    writer.write(prefix).await?;
    let mut size = prefix.len() as u64;

    let mut chunk = vec![0u8; writer.size()];
    while let Some(n) = part.read(&mut chunk).await? {
        writer.write(&chunk[..n]).await?;
        size += n as u64;
    }

    writer.flush().await?;
    Ok(size)
}
