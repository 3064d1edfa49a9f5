use std::io;
use std::path::{Path, PathBuf};

/// Name used when a client filename sanitizes down to nothing
pub const FALLBACK_FILENAME: &str = "unnamed";

const MAX_FILENAME_BYTES: usize = 255;

/// Resolves a filename inside a directory that no existing entry occupies
pub trait AvailableFilename: Send + Sync {
    fn available_path(&self, dir: &Path, filename: &str) -> io::Result<PathBuf>;
}

/// Appends `(n)` to the stem until the name is free: `a.txt`, `a(1).txt`, `a(2).txt`, ...
#[derive(Debug, Clone)]
pub struct NumberedFilename {
    max_attempts: u32,
}

impl NumberedFilename {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl Default for NumberedFilename {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AvailableFilename for NumberedFilename {
    fn available_path(&self, dir: &Path, filename: &str) -> io::Result<PathBuf> {
        let candidate = dir.join(filename);
        if !is_occupied(&candidate)? {
            return Ok(candidate);
        }

        let (stem, extension) = split_extension(filename);
        for n in 1..=self.max_attempts {
            let candidate = dir.join(format!("{stem}({n}){extension}"));
            if !is_occupied(&candidate)? {
                return Ok(candidate);
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "no free name for '{}' in {} after {} attempts",
                filename,
                dir.display(),
                self.max_attempts
            ),
        ))
    }
}

/// Dangling symlinks count as occupied
fn is_occupied(path: &Path) -> io::Result<bool> {
    match path.symlink_metadata() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Splits `archive.tar.gz` into (`archive.tar`, `.gz`); names without a dot keep no extension
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

/// Reduces a client-supplied filename to a single safe path component.
///
/// Drops any directory part (both `/` and `\` separators), replaces control
/// and reserved characters with `_`, strips leading dots and caps the length
/// at 255 bytes.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or("");

    if name != filename {
        tracing::warn!("Path components stripped from client filename: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim().trim_start_matches('.');

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > MAX_FILENAME_BYTES {
        let mut end = MAX_FILENAME_BYTES;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        &sanitized[..end]
    } else {
        sanitized
    };

    if sanitized.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitized.to_string()
    }
}
