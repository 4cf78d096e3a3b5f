use super::errors::{Result, UploadError};
use super::types::{FileInfo, MAX_FILE_SIZE};

/// 预检：MIME 白名单、大小上限、空文件
///
/// Allow-list entries ending in `/*` match any subtype.
pub fn validate_file<S: AsRef<str>>(file: &FileInfo, allowed_types: &[S]) -> Result<()> {
    let is_valid_type = allowed_types.iter().any(|allowed| {
        let allowed = allowed.as_ref();
        match allowed.strip_suffix("/*") {
            Some(prefix) => file.mime_type.starts_with(prefix),
            None => file.mime_type == allowed,
        }
    });

    if !is_valid_type {
        let list: Vec<&str> = allowed_types.iter().map(|t| t.as_ref()).collect();
        return Err(UploadError::Validation(format!(
            "Invalid file type. Allowed types: {}",
            list.join(", ")
        )));
    }

    if file.size > MAX_FILE_SIZE {
        return Err(UploadError::Validation("File size exceeds 10GB limit".to_string()));
    }

    if file.size == 0 {
        return Err(UploadError::Validation("File is empty".to_string()));
    }

    Ok(())
}

pub fn validate_location(location: Option<&str>) -> Result<()> {
    match location {
        Some(loc) if !loc.trim().is_empty() => Ok(()),
        _ => Err(UploadError::Validation("Location is required".to_string())),
    }
}
