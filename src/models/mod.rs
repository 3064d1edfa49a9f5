use serde::Deserialize;
use serde_json::Value;

/// Message returned for codes missing from [`UPLOAD_ERROR_MESSAGES`], 0 included.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Fixed descriptions for the nonzero upload status codes.
pub const UPLOAD_ERROR_MESSAGES: &[(i64, &str)] = &[
    (1, "The uploaded file exceeds the server's maximum upload size"),
    (2, "The uploaded file exceeds the MAX_FILE_SIZE limit set by the form"),
    (3, "The uploaded file was only partially uploaded"),
    (4, "No file was uploaded"),
    (6, "Missing a temporary folder"),
    (7, "Failed to write file to disk"),
    (8, "File upload stopped by extension"),
];

/// Looks up the description of an upload status code
pub fn error_message(code: i64) -> &'static str {
    UPLOAD_ERROR_MESSAGES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, message)| *message)
        .unwrap_or(UNKNOWN_ERROR)
}

/// Outcome of receiving one file field, as assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Ok,
    ExceedsServerLimit,
    ExceedsFormLimit,
    Partial,
    NoFile,
    NoTempDir,
    CantWrite,
    Rejected,
}

impl UploadStatus {
    pub fn code(self) -> i64 {
        match self {
            UploadStatus::Ok => 0,
            UploadStatus::ExceedsServerLimit => 1,
            UploadStatus::ExceedsFormLimit => 2,
            UploadStatus::Partial => 3,
            UploadStatus::NoFile => 4,
            UploadStatus::NoTempDir => 6,
            UploadStatus::CantWrite => 7,
            UploadStatus::Rejected => 8,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(UploadStatus::Ok),
            1 => Some(UploadStatus::ExceedsServerLimit),
            2 => Some(UploadStatus::ExceedsFormLimit),
            3 => Some(UploadStatus::Partial),
            4 => Some(UploadStatus::NoFile),
            6 => Some(UploadStatus::NoTempDir),
            7 => Some(UploadStatus::CantWrite),
            8 => Some(UploadStatus::Rejected),
            _ => None,
        }
    }
}

/// One uploaded field as stored in the host's upload table.
///
/// `name` and `mime_type` come straight from the client and must not be
/// trusted; in particular `name` is never used as a path without sanitizing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadEntry {
    pub name: String,
    pub mime_type: String,
    /// Empty when no file reached temp storage
    pub temp_path: String,
    pub size: u64,
    pub error_code: i64,
}

impl UploadEntry {
    /// Entry for a field whose file never reached temp storage
    pub fn failed(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        status: UploadStatus,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            temp_path: String::new(),
            size: 0,
            error_code: status.code(),
        }
    }
}

/// Loosely typed upload entry as handed over by an untyped host.
///
/// `size` and `error` may arrive as numbers, numeric strings, garbage or
/// not at all; conversion into [`UploadEntry`] coerces anything unusable to 0.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawUploadEntry {
    pub name: String,
    #[serde(alias = "type")]
    pub mime_type: String,
    #[serde(alias = "tmp_name")]
    pub temp_path: String,
    pub size: Value,
    #[serde(alias = "error")]
    pub error_code: Value,
}

impl From<RawUploadEntry> for UploadEntry {
    fn from(raw: RawUploadEntry) -> Self {
        Self {
            name: raw.name,
            mime_type: raw.mime_type,
            temp_path: raw.temp_path,
            size: u64::try_from(coerce_integer(&raw.size)).unwrap_or(0),
            error_code: coerce_integer(&raw.error_code),
        }
    }
}

/// Permissive integer parse: numbers and numeric strings, 0 for anything else
fn coerce_integer(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
