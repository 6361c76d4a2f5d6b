use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    #[error("Invalid file type. Accepted: {accepted}")]
    Extension { accepted: String },

    #[error("File too large. Maximum size: {max_size_mb}MB")]
    TooLarge { max_size_mb: u32 },
}

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Extension of `file_name`: the text after the last dot, lowercased, without
/// the dot. `None` when there is no usable extension.
pub fn extension_of(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Check a candidate file against the configured constraints.
///
/// The extension check runs before the size check and the first failure
/// determines the reported reason. Nothing is mutated.
pub fn validate_file(
    file_name: &str,
    size_bytes: u64,
    accepted_extensions: &[String],
    max_size_mb: u32,
) -> Result<(), ValidateError> {
    let reject = || ValidateError::Extension {
        accepted: accepted_extensions.join(", "),
    };

    let extension = extension_of(file_name).ok_or_else(reject)?;
    let dotted = format!(".{extension}");
    if !accepted_extensions
        .iter()
        .any(|accepted| accepted.eq_ignore_ascii_case(&dotted))
    {
        return Err(reject());
    }

    let size_mb = size_bytes as f64 / BYTES_PER_MB;
    if size_mb > f64::from(max_size_mb) {
        return Err(ValidateError::TooLarge { max_size_mb });
    }

    Ok(())
}

/// MIME type for a (lowercased) extension, used when the caller does not
/// supply one.
pub fn mime_for(extension: &str) -> &'static str {
    match extension {
        "csv" => "text/csv",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
