use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Upload handling configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Directory the host spools incoming files into (default: OS temp dir)
    pub temp_dir: PathBuf,

    /// Directory uploads are moved into by the HTTP handler (default: "./uploads")
    pub upload_dir: PathBuf,

    /// Maximum size of a single uploaded file in bytes (default: 64 MB)
    pub max_file_size: usize,

    /// Maximum number of file fields accepted per request (default: 20)
    pub max_file_uploads: usize,

    /// Lowercase extensions whose uploads are stopped with code 8 (default: none)
    pub blocked_extensions: Vec<String>,

    /// Address the server binds to (default: 127.0.0.1:3000)
    pub listen_addr: SocketAddr,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: env::temp_dir(),
            upload_dir: PathBuf::from("./uploads"),
            max_file_size: 64 * 1024 * 1024, // 64 MB
            max_file_uploads: 20,
            blocked_extensions: Vec::new(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            temp_dir: env::var("UPLOAD_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.temp_dir),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_file_uploads: env::var("MAX_FILE_UPLOADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_uploads),

            blocked_extensions: env::var("BLOCKED_EXTENSIONS")
                .map(|v| parse_extension_list(&v))
                .unwrap_or(default.blocked_extensions),

            listen_addr: env::var("LISTEN_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.listen_addr),
        }
    }

    /// Create config for development (small limits, everything under one root)
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            temp_dir: root.join("tmp"),
            upload_dir: root.join("uploads"),
            max_file_size: 8 * 1024 * 1024,
            max_file_uploads: 20,
            blocked_extensions: Vec::new(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }

    /// Whether a client filename carries one of the blocked extensions
    pub fn is_blocked(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_lowercase();
                self.blocked_extensions.iter().any(|blocked| *blocked == ext)
            }
            None => false,
        }
    }

    /// Request body limit covering the largest accepted multipart payload
    pub fn max_body_size(&self) -> usize {
        self.max_file_size
            .saturating_mul(self.max_file_uploads.max(1))
            .saturating_add(64 * 1024)
    }
}

fn parse_extension_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
