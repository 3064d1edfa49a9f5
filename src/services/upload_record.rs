use crate::models::{UploadEntry, error_message};
use crate::services::upload_table::UploadHost;
use crate::utils::filename::{AvailableFilename, NumberedFilename, sanitize_filename};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// How often a directory move looks up a new name after losing one to a concurrent writer
const MAX_NAME_RETRIES: u32 = 32;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No upload found for field '{0}'")]
    FieldNotFound(String),

    #[error("Upload of field '{field}' failed: {message}")]
    UploadFailed {
        field: String,
        code: i64,
        message: &'static str,
    },

    #[error("Failed to move upload to {}: {source}", .target.display())]
    MoveFailed {
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One uploaded field of the current request.
///
/// Accessors return the stored values untouched; only [`UploadRecord::move_to`]
/// touches the filesystem.
pub struct UploadRecord<'a> {
    field: String,
    entry: UploadEntry,
    host: &'a dyn UploadHost,
    filenames: Arc<dyn AvailableFilename>,
}

impl<'a> UploadRecord<'a> {
    pub fn new(host: &'a dyn UploadHost, field: &str) -> Result<Self, UploadError> {
        let entry = host
            .entry(field)
            .cloned()
            .ok_or_else(|| UploadError::FieldNotFound(field.to_string()))?;

        Ok(Self {
            field: field.to_string(),
            entry,
            host,
            filenames: Arc::new(NumberedFilename::default()),
        })
    }

    /// Replaces the collision policy used when moving into a directory
    pub fn with_filenames(mut self, filenames: Arc<dyn AvailableFilename>) -> Self {
        self.filenames = filenames;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Client filename, unsanitized
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Client-declared MIME type, never verified
    pub fn mime_type(&self) -> &str {
        &self.entry.mime_type
    }

    pub fn temp_path(&self) -> &str {
        &self.entry.temp_path
    }

    pub fn size(&self) -> u64 {
        self.entry.size
    }

    pub fn error_code(&self) -> i64 {
        self.entry.error_code
    }

    /// Description of [`error_code`](Self::error_code).
    /// Code 0 has no entry and reads "Unknown error".
    pub fn error_message(&self) -> &'static str {
        error_message(self.entry.error_code)
    }

    /// Moves the uploaded file out of temp storage and returns where it landed.
    ///
    /// An existing directory receives the file under a free name derived from
    /// [`name`](Self::name); any other destination is used as the literal
    /// target path and overwritten if present. The temp file is consumed, so
    /// a second call fails.
    pub fn move_to(&self, destination: impl AsRef<Path>) -> Result<PathBuf, UploadError> {
        if self.entry.error_code != 0 {
            return Err(UploadError::UploadFailed {
                field: self.field.clone(),
                code: self.entry.error_code,
                message: self.error_message(),
            });
        }

        let destination = destination.as_ref();
        let target = if destination.is_dir() {
            self.move_into_dir(destination)?
        } else {
            let target = destination.to_path_buf();
            self.host
                .move_uploaded_file(Path::new(self.temp_path()), &target)
                .map_err(|source| UploadError::MoveFailed {
                    target: target.clone(),
                    source,
                })?;
            target
        };

        tracing::info!(
            "Moved upload '{}' ({} bytes) to {}",
            self.field,
            self.entry.size,
            target.display()
        );
        Ok(target)
    }

    /// Claims a free name in `dir` without ever replacing an existing file.
    ///
    /// Another request may take the name between the lookup and the move, in
    /// which case the lookup runs again.
    fn move_into_dir(&self, dir: &Path) -> Result<PathBuf, UploadError> {
        let filename = sanitize_filename(self.name());
        let temp_path = Path::new(self.temp_path());
        let mut retries = 0;

        loop {
            let target = self
                .filenames
                .available_path(dir, &filename)
                .map_err(|source| UploadError::MoveFailed {
                    target: dir.join(&filename),
                    source,
                })?;

            match self.host.move_uploaded_file_noclobber(temp_path, &target) {
                Ok(()) => return Ok(target),
                Err(e)
                    if e.kind() == io::ErrorKind::AlreadyExists && retries < MAX_NAME_RETRIES =>
                {
                    retries += 1;
                    tracing::debug!(
                        "{} was taken meanwhile, picking another name",
                        target.display()
                    );
                }
                Err(source) => return Err(UploadError::MoveFailed { target, source }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawUploadEntry, UploadStatus};
    use crate::services::upload_table::UploadTable;
    use std::fs;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use tempfile::NamedTempFile;

    fn table_with(dir: &Path, field: &str, name: &str, contents: &[u8]) -> UploadTable {
        let mut file = NamedTempFile::new_in(dir).unwrap();
        file.write_all(contents).unwrap();
        let mut table = UploadTable::new();
        table.insert_file(field, name, "text/plain", file).unwrap();
        table
    }

    #[test]
    fn test_accessors_return_stored_values() {
        let mut table = UploadTable::new();
        table.insert(
            "avatar",
            UploadEntry {
                name: "../me.png".to_string(),
                mime_type: "image/png".to_string(),
                temp_path: "/tmp/php123".to_string(),
                size: 2048,
                error_code: 0,
            },
        );

        let record = UploadRecord::new(&table, "avatar").unwrap();
        assert_eq!(record.field(), "avatar");
        assert_eq!(record.name(), "../me.png");
        assert_eq!(record.mime_type(), "image/png");
        assert_eq!(record.temp_path(), "/tmp/php123");
        assert_eq!(record.size(), 2048);
        assert_eq!(record.error_code(), 0);
    }

    #[test]
    fn test_missing_field() {
        let table = UploadTable::new();
        match UploadRecord::new(&table, "avatar") {
            Err(UploadError::FieldNotFound(field)) => assert_eq!(field, "avatar"),
            _ => panic!("expected FieldNotFound"),
        }
    }

    #[test]
    fn test_error_message_per_code() {
        let mut table = UploadTable::new();
        for (field, code) in [("partial", 3), ("none", 4), ("ok", 0), ("odd", 42)] {
            table.insert(
                field,
                UploadEntry {
                    error_code: code,
                    ..Default::default()
                },
            );
        }

        let message = |field| UploadRecord::new(&table, field).unwrap().error_message();
        assert_eq!(message("partial"), "The uploaded file was only partially uploaded");
        assert_eq!(message("none"), "No file was uploaded");
        assert_eq!(message("ok"), "Unknown error");
        assert_eq!(message("odd"), "Unknown error");
    }

    #[test]
    fn test_malformed_numbers_read_as_zero() {
        let raw: RawUploadEntry =
            serde_json::from_value(serde_json::json!({ "size": "3 bytes", "error": "oops" }))
                .unwrap();
        let table = UploadTable::from_raw([("doc", raw)]);

        let record = UploadRecord::new(&table, "doc").unwrap();
        assert_eq!(record.size(), 0);
        assert_eq!(record.error_code(), 0);
    }

    #[test]
    fn test_move_rejects_failed_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = UploadTable::new();
        table.insert(
            "doc",
            UploadEntry::failed("a.txt", "text/plain", UploadStatus::Partial),
        );

        let record = UploadRecord::new(&table, "doc").unwrap();
        match record.move_to(dir.path()) {
            Err(UploadError::UploadFailed { code, message, .. }) => {
                assert_eq!(code, 3);
                assert_eq!(message, "The uploaded file was only partially uploaded");
            }
            other => panic!("expected UploadFailed, got {:?}", other),
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_move_into_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let table = table_with(tmp.path(), "doc", "a.txt", b"abc");

        let record = UploadRecord::new(&table, "doc").unwrap();
        let path = record.move_to(uploads.path()).unwrap();

        assert_eq!(path, uploads.path().join("a.txt"));
        assert_eq!(fs::read(&path).unwrap(), b"abc");
        assert!(!Path::new(record.temp_path()).exists());
    }

    #[test]
    fn test_move_into_directory_avoids_collision() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();

        let first = table_with(tmp.path(), "doc", "a.txt", b"one");
        let first_path = UploadRecord::new(&first, "doc")
            .unwrap()
            .move_to(uploads.path())
            .unwrap();

        let second = table_with(tmp.path(), "doc", "a.txt", b"two");
        let second_path = UploadRecord::new(&second, "doc")
            .unwrap()
            .move_to(uploads.path())
            .unwrap();

        assert_eq!(first_path, uploads.path().join("a.txt"));
        assert_eq!(second_path, uploads.path().join("a(1).txt"));
        assert_eq!(fs::read(&first_path).unwrap(), b"one");
        assert_eq!(fs::read(&second_path).unwrap(), b"two");
    }

    #[test]
    fn test_move_sanitizes_client_name() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let table = table_with(tmp.path(), "doc", "../../etc/passwd", b"x");

        let path = UploadRecord::new(&table, "doc")
            .unwrap()
            .move_to(uploads.path())
            .unwrap();
        assert_eq!(path, uploads.path().join("passwd"));
    }

    #[test]
    fn test_move_to_literal_path_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let target = uploads.path().join("report-final.txt");
        fs::write(&target, b"old").unwrap();

        let table = table_with(tmp.path(), "doc", "a.txt", b"new");
        let path = UploadRecord::new(&table, "doc")
            .unwrap()
            .move_to(&target)
            .unwrap();

        assert_eq!(path, target);
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn test_move_twice_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let table = table_with(tmp.path(), "doc", "a.txt", b"abc");
        let record = UploadRecord::new(&table, "doc").unwrap();

        record.move_to(uploads.path()).unwrap();
        assert!(matches!(
            record.move_to(uploads.path()),
            Err(UploadError::MoveFailed { .. })
        ));
        assert_eq!(fs::read_dir(uploads.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_move_refuses_forged_temp_path() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret");
        fs::write(&secret, b"hunter2").unwrap();

        let mut table = UploadTable::new();
        table.insert(
            "doc",
            UploadEntry {
                name: "loot.txt".to_string(),
                temp_path: secret.to_string_lossy().into_owned(),
                size: 7,
                ..Default::default()
            },
        );

        let uploads = tempfile::tempdir().unwrap();
        let err = UploadRecord::new(&table, "doc")
            .unwrap()
            .move_to(uploads.path())
            .unwrap_err();

        assert!(matches!(err, UploadError::MoveFailed { .. }));
        assert!(secret.exists());
        assert_eq!(fs::read_dir(uploads.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_concurrent_moves_never_share_a_name() {
        for _ in 0..50 {
            let tmp = tempfile::tempdir().unwrap();
            let uploads = tempfile::tempdir().unwrap();
            let barrier = Barrier::new(2);

            let paths: Vec<PathBuf> = thread::scope(|s| {
                let handles: Vec<_> = [&b"one"[..], &b"two"[..]]
                    .into_iter()
                    .map(|contents| {
                        let (tmp, uploads, barrier) = (tmp.path(), uploads.path(), &barrier);
                        s.spawn(move || {
                            let table = table_with(tmp, "doc", "a.txt", contents);
                            let record = UploadRecord::new(&table, "doc").unwrap();
                            barrier.wait();
                            record.move_to(uploads).unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_ne!(paths[0], paths[1]);
            assert_eq!(fs::read_dir(uploads.path()).unwrap().count(), 2);

            let mut stored: Vec<Vec<u8>> = paths.iter().map(|p| fs::read(p).unwrap()).collect();
            stored.sort();
            assert_eq!(stored, vec![b"one".to_vec(), b"two".to_vec()]);
        }
    }

    #[test]
    fn test_move_into_directory_retries_taken_name() {
        // Hands out a name that is already taken, then a free one
        struct Stale(AtomicU32);
        impl AvailableFilename for Stale {
            fn available_path(&self, dir: &Path, _filename: &str) -> io::Result<PathBuf> {
                match self.0.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(dir.join("taken.txt")),
                    _ => Ok(dir.join("free.txt")),
                }
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        fs::write(uploads.path().join("taken.txt"), b"keep me").unwrap();
        let table = table_with(tmp.path(), "doc", "a.txt", b"abc");

        let path = UploadRecord::new(&table, "doc")
            .unwrap()
            .with_filenames(Arc::new(Stale(AtomicU32::new(0))))
            .move_to(uploads.path())
            .unwrap();

        assert_eq!(path, uploads.path().join("free.txt"));
        assert_eq!(fs::read(&path).unwrap(), b"abc");
        assert_eq!(fs::read(uploads.path().join("taken.txt")).unwrap(), b"keep me");
    }

    #[test]
    fn test_move_into_directory_gives_up_on_taken_name() {
        struct Taken;
        impl AvailableFilename for Taken {
            fn available_path(&self, dir: &Path, _filename: &str) -> io::Result<PathBuf> {
                Ok(dir.join("taken.txt"))
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        fs::write(uploads.path().join("taken.txt"), b"keep me").unwrap();
        let table = table_with(tmp.path(), "doc", "a.txt", b"abc");
        let record = UploadRecord::new(&table, "doc")
            .unwrap()
            .with_filenames(Arc::new(Taken));

        match record.move_to(uploads.path()) {
            Err(UploadError::MoveFailed { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists)
            }
            other => panic!("expected MoveFailed, got {:?}", other),
        }
        assert_eq!(fs::read(uploads.path().join("taken.txt")).unwrap(), b"keep me");
        assert!(table.is_accepted(Path::new(record.temp_path())));
    }

    #[test]
    fn test_custom_filename_policy() {
        struct Fixed;
        impl AvailableFilename for Fixed {
            fn available_path(&self, dir: &Path, _filename: &str) -> io::Result<PathBuf> {
                Ok(dir.join("fixed.bin"))
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let table = table_with(tmp.path(), "doc", "a.txt", b"abc");

        let path = UploadRecord::new(&table, "doc")
            .unwrap()
            .with_filenames(Arc::new(Fixed))
            .move_to(uploads.path())
            .unwrap();
        assert_eq!(path, uploads.path().join("fixed.bin"));
    }
}
