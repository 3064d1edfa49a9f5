use crate::config::UploadConfig;
use crate::models::{UploadEntry, UploadStatus};
use crate::services::upload_table::UploadTable;
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

/// Form field that lowers the per-file limit for the file fields after it
pub const FORM_SIZE_FIELD: &str = "MAX_FILE_SIZE";

const TEMP_PREFIX: &str = "upload-";

enum Spooled {
    Stored(NamedTempFile),
    Failed(UploadStatus),
}

/// Spools every file field of a multipart request into temp storage.
///
/// Each file field ends up in the table either as a movable upload or as an
/// entry carrying the status code that stopped it. A broken stream ends
/// intake early; fields read so far are kept.
pub async fn collect_uploads(mut multipart: Multipart, config: &UploadConfig) -> UploadTable {
    let mut table = UploadTable::new();
    let mut form_limit: Option<u64> = None;
    let mut file_fields = 0usize;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Multipart stream ended unexpectedly: {}", e);
                break;
            }
        };

        let Some(field_name) = field.name().map(str::to_owned) else {
            continue;
        };

        let Some(file_name) = field.file_name().map(str::to_owned) else {
            if field_name == FORM_SIZE_FIELD {
                form_limit = field.text().await.ok().and_then(|v| v.trim().parse().ok());
            }
            continue;
        };

        if file_fields >= config.max_file_uploads {
            tracing::warn!(
                "Skipping upload field '{}': more than {} files in one request",
                field_name,
                config.max_file_uploads
            );
            continue;
        }
        file_fields += 1;

        let mime_type = field.content_type().unwrap_or_default().to_string();

        let spooled = if file_name.is_empty() {
            Spooled::Failed(UploadStatus::NoFile)
        } else if config.is_blocked(&file_name) {
            tracing::warn!("Upload '{}' stopped: blocked extension", file_name);
            Spooled::Failed(UploadStatus::Rejected)
        } else {
            spool_field(&mut field, config, form_limit).await
        };

        match spooled {
            Spooled::Stored(file) => {
                if let Err(e) = table.insert_file(
                    field_name.clone(),
                    file_name.clone(),
                    mime_type.clone(),
                    file,
                ) {
                    tracing::error!("Failed to register upload '{}': {}", field_name, e);
                    table.insert(
                        field_name,
                        UploadEntry::failed(file_name, mime_type, UploadStatus::CantWrite),
                    );
                }
            }
            Spooled::Failed(status) => {
                let partial = status == UploadStatus::Partial;
                table.insert(field_name, UploadEntry::failed(file_name, mime_type, status));
                if partial {
                    break;
                }
            }
        }
    }

    table
}

async fn spool_field(
    field: &mut Field<'_>,
    config: &UploadConfig,
    form_limit: Option<u64>,
) -> Spooled {
    if !tokio::fs::metadata(&config.temp_dir)
        .await
        .is_ok_and(|meta| meta.is_dir())
    {
        tracing::error!("Upload temp dir {} is missing", config.temp_dir.display());
        return Spooled::Failed(UploadStatus::NoTempDir);
    }

    let temp_file = match tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(&config.temp_dir)
    {
        Ok(file) => file,
        Err(e) => {
            tracing::error!("Failed to create temp file: {}", e);
            return Spooled::Failed(UploadStatus::CantWrite);
        }
    };

    let mut writer = match temp_file.reopen() {
        Ok(file) => tokio::fs::File::from_std(file),
        Err(e) => {
            tracing::error!("Failed to open temp file: {}", e);
            return Spooled::Failed(UploadStatus::CantWrite);
        }
    };

    let mut total_size: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Upload interrupted after {} bytes: {}", total_size, e);
                return Spooled::Failed(UploadStatus::Partial);
            }
        };

        total_size += chunk.len() as u64;
        if total_size > config.max_file_size as u64 {
            return Spooled::Failed(UploadStatus::ExceedsServerLimit);
        }
        if form_limit.is_some_and(|limit| total_size > limit) {
            return Spooled::Failed(UploadStatus::ExceedsFormLimit);
        }

        if let Err(e) = writer.write_all(&chunk).await {
            tracing::error!("Failed to write upload to temp storage: {}", e);
            return Spooled::Failed(UploadStatus::CantWrite);
        }
    }

    if let Err(e) = writer.flush().await {
        tracing::error!("Failed to flush upload to temp storage: {}", e);
        return Spooled::Failed(UploadStatus::CantWrite);
    }

    tracing::debug!("Spooled {} bytes to {}", total_size, temp_file.path().display());
    Spooled::Stored(temp_file)
}
