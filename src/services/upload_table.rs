use crate::models::{RawUploadEntry, UploadEntry};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::{NamedTempFile, PathPersistError, TempPath};

/// The host environment an [`UploadRecord`](super::upload_record::UploadRecord) reads from
pub trait UploadHost: Send + Sync {
    /// Entry uploaded under `field`, if any
    fn entry(&self, field: &str) -> Option<&UploadEntry>;

    /// Relocates a temp file this host produced for the current request.
    ///
    /// Unlike a plain rename this refuses any `temp_path` the host did not
    /// spool itself, so a forged entry cannot move arbitrary local files.
    fn move_uploaded_file(&self, temp_path: &Path, target: &Path) -> io::Result<()>;

    /// Same as [`move_uploaded_file`](Self::move_uploaded_file), but fails with
    /// `AlreadyExists` instead of replacing an existing `target`.
    fn move_uploaded_file_noclobber(&self, temp_path: &Path, target: &Path) -> io::Result<()>;
}

/// Per-request table of uploaded fields.
///
/// Temp files registered through [`UploadTable::insert_file`] are owned by
/// the table and removed when it drops unless they were moved away first.
#[derive(Debug, Default)]
pub struct UploadTable {
    entries: HashMap<String, UploadEntry>,
    accepted: Mutex<HashMap<PathBuf, TempPath>>,
}

impl UploadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from untyped host input. None of these entries is movable.
    pub fn from_raw<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, RawUploadEntry)>,
        K: Into<String>,
    {
        let mut table = Self::new();
        for (field, raw) in entries {
            table.insert(field, UploadEntry::from(raw));
        }
        table
    }

    /// Adds an entry without a backing temp file. A later entry for the same field replaces it.
    pub fn insert(&mut self, field: impl Into<String>, entry: UploadEntry) {
        let field = field.into();
        if let Some(previous) = self.entries.insert(field.clone(), entry) {
            tracing::debug!("Upload field '{}' submitted more than once, keeping the last", field);
            self.discard(&previous);
        }
    }

    /// Registers a file spooled by the host as a genuine, movable upload
    pub fn insert_file(
        &mut self,
        field: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        file: NamedTempFile,
    ) -> io::Result<()> {
        let size = file.as_file().metadata()?.len();
        let temp_path = file.into_temp_path();
        let entry = UploadEntry {
            name: name.into(),
            mime_type: mime_type.into(),
            temp_path: temp_path.to_string_lossy().into_owned(),
            size,
            error_code: 0,
        };

        self.accepted
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(temp_path.to_path_buf(), temp_path);
        self.insert(field, entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `path` is a temp file of this request that has not been moved yet
    pub fn is_accepted(&self, path: &Path) -> bool {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    fn discard(&mut self, entry: &UploadEntry) {
        if entry.temp_path.is_empty() {
            return;
        }
        // Dropping the TempPath deletes the file
        self.accepted
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(Path::new(&entry.temp_path));
    }
}

impl UploadHost for UploadTable {
    fn entry(&self, field: &str) -> Option<&UploadEntry> {
        self.entries.get(field)
    }

    fn move_uploaded_file(&self, temp_path: &Path, target: &Path) -> io::Result<()> {
        self.relocate(temp_path, target, true)
    }

    fn move_uploaded_file_noclobber(&self, temp_path: &Path, target: &Path) -> io::Result<()> {
        self.relocate(temp_path, target, false)
    }
}

impl UploadTable {
    fn relocate(&self, temp_path: &Path, target: &Path, overwrite: bool) -> io::Result<()> {
        let mut accepted = self.accepted.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(upload) = accepted.remove(temp_path) else {
            tracing::warn!(
                "Refusing to move {}: not an accepted upload of this request",
                temp_path.display()
            );
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not an accepted upload", temp_path.display()),
            ));
        };

        let persisted = if overwrite {
            upload.persist(target)
        } else {
            upload.persist_noclobber(target)
        };

        match persisted {
            Ok(()) => Ok(()),
            Err(PathPersistError { error, path })
                if error.kind() == io::ErrorKind::CrossesDevices =>
            {
                tracing::debug!(
                    "Rename across filesystems, copying {} to {}",
                    path.display(),
                    target.display()
                );
                match copy_upload(&path, target, overwrite) {
                    // The TempPath drops here and removes the source
                    Ok(()) => Ok(()),
                    Err(e) => {
                        accepted.insert(path.to_path_buf(), path);
                        Err(e)
                    }
                }
            }
            Err(PathPersistError { error, path }) => {
                accepted.insert(path.to_path_buf(), path);
                Err(error)
            }
        }
    }
}

/// Copy fallback for renames that cross filesystems. Without `overwrite` an
/// existing target is left alone and reported as `AlreadyExists`.
fn copy_upload(source: &Path, target: &Path, overwrite: bool) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut output = options.open(target)?;
    let copied = fs::File::open(source).and_then(|mut input| io::copy(&mut input, &mut output));
    if let Err(e) = copied {
        drop(output);
        let _ = fs::remove_file(target);
        return Err(e);
    }
    Ok(())
}
