use crate::api::error::UploadError;

/// Default ceiling for a single upload: 5 GB
pub const MAX_UPLOAD_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Longest path component accepted on local filesystems
const MAX_COMPONENT_LEN: usize = 255;

/// Characters rejected in physical names on local disk (Windows reserved set).
const ILLEGAL_DISK_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Validates a declared upload size against the configured ceiling
pub fn validate_file_size(size: u64, max_size: u64) -> Result<(), UploadError> {
    if size > max_size {
        return Err(UploadError::RequestEntityTooLarge(format!(
            "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
            size,
            max_size,
            max_size / 1024 / 1024
        )));
    }
    Ok(())
}

/// Validates a physical storage name.
///
/// Path traversal, absolute paths and NUL bytes are always rejected. When
/// `local_filesystem` is set, characters illegal on common disk filesystems
/// and over-long components are rejected as well. Forward slashes are
/// allowed and map to subdirectories.
pub fn validate_file_name(name: &str, local_filesystem: bool) -> Result<(), UploadError> {
    if name.is_empty() {
        return Err(UploadError::InvalidFileName(
            "Filename cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(UploadError::InvalidFileName(
            "Filename contains a null byte".to_string(),
        ));
    }

    if name.starts_with('/') || name.starts_with('\\') || has_drive_prefix(name) {
        tracing::warn!("Absolute path rejected: {}", name);
        return Err(UploadError::InvalidFileName(format!(
            "Absolute paths are not allowed: {}",
            name
        )));
    }

    for component in name.split(['/', '\\']) {
        if component == ".." {
            tracing::warn!("Path traversal attempt detected: {}", name);
            return Err(UploadError::InvalidFileName(format!(
                "Path traversal is not allowed: {}",
                name
            )));
        }

        if !local_filesystem {
            continue;
        }

        if component.is_empty() || component == "." {
            return Err(UploadError::InvalidFileName(format!(
                "Empty path component in {}",
                name
            )));
        }

        if component.len() > MAX_COMPONENT_LEN {
            return Err(UploadError::InvalidFileName(format!(
                "Path component longer than {} bytes",
                MAX_COMPONENT_LEN
            )));
        }

        if let Some(c) = component
            .chars()
            .find(|c| c.is_control() || ILLEGAL_DISK_CHARS.contains(c))
        {
            return Err(UploadError::InvalidFileName(format!(
                "Character {:?} is not allowed on disk: {}",
                c, name
            )));
        }

        if component.ends_with(' ') || component.ends_with('.') {
            return Err(UploadError::InvalidFileName(format!(
                "Path components cannot end with a space or dot: {}",
                name
            )));
        }
    }

    Ok(())
}

/// Validates an upload id. Ids become sidecar file names, so they are held
/// to the strictest rules and may not contain separators.
pub fn validate_id(id: &str) -> Result<(), UploadError> {
    if id.contains('/') || id.contains('\\') {
        return Err(UploadError::InvalidFileName(format!(
            "Upload id cannot contain path separators: {}",
            id
        )));
    }
    validate_file_name(id, true)
}

/// Original (user-facing) names are only stored, never used as paths.
pub fn validate_original_name(name: &str) -> Result<(), UploadError> {
    if name.contains('\0') {
        return Err(UploadError::InvalidFileName(
            "Original name contains a null byte".to_string(),
        ));
    }
    Ok(())
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// True when the declared content type carries no information
pub fn is_generic_content_type(content_type: &str) -> bool {
    let normalized = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    normalized.is_empty()
        || normalized == "application/octet-stream"
        || normalized == "binary/octet-stream"
}

/// Detects a MIME type from leading bytes using magic numbers
pub fn sniff_content_type(header: &[u8]) -> Option<&'static str> {
    infer::get(header).map(|kind| kind.mime_type())
}

/// Checks if file content appears to be executable
pub fn is_executable_content(header: &[u8]) -> bool {
    if header.len() < 4 {
        return false;
    }

    // ELF binary (Linux)
    if header.starts_with(&[0x7F, 0x45, 0x4C, 0x46]) {
        return true;
    }

    // PE/COFF (Windows .exe, .dll)
    if header.starts_with(&[0x4D, 0x5A]) {
        return true;
    }

    // Mach-O (macOS)
    if header.starts_with(&[0xFE, 0xED, 0xFA, 0xCE])
        || header.starts_with(&[0xFE, 0xED, 0xFA, 0xCF])
        || header.starts_with(&[0xCE, 0xFA, 0xED, 0xFE])
        || header.starts_with(&[0xCF, 0xFA, 0xED, 0xFE])
    {
        return true;
    }

    // Shebang (shell scripts)
    header.starts_with(b"#!")
}

/// Calculate Shannon entropy to detect packed/encrypted content
pub fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut frequency = [0usize; 256];
    for &byte in data {
        frequency[byte as usize] += 1;
    }
    let len = data.len() as f64;
    frequency
        .iter()
        .filter(|&&count| count > 0)
        .fold(0.0, |acc, &count| {
            let p = count as f64 / len;
            acc - p * p.log2()
        })
}

/// Deep inspection for hidden threats (scripts, high entropy in text)
pub fn inspect_content_security(header: &[u8], mime_type: &str) -> Result<(), UploadError> {
    let check_len = std::cmp::min(header.len(), 2048);
    let sample = &header[..check_len];

    let sample_lower = sample
        .iter()
        .map(|b| b.to_ascii_lowercase())
        .collect::<Vec<u8>>();
    let sample_str = String::from_utf8_lossy(&sample_lower);

    let dangerous_patterns = [
        "<script",
        "javascript:",
        "vbscript:",
        "onload=",
        "onerror=",
        "onclick=",
        "onmouseover=",
    ];

    for pattern in dangerous_patterns {
        if sample_str.contains(pattern) {
            return Err(UploadError::ContentRejected(format!(
                "File contains potentially malicious script pattern: '{}'",
                pattern
            )));
        }
    }

    if mime_type.starts_with("text/") {
        let entropy = calculate_entropy(sample);
        if entropy > 7.5 {
            tracing::warn!(
                "High entropy ({:.2}) detected in text file. Potential embedded code/obfuscation.",
                entropy
            );
            if entropy > 7.9 {
                return Err(UploadError::ContentRejected(
                    "Text file has suspiciously high entropy, resembling encrypted data."
                        .to_string(),
                ));
            }
        }
    }

    Ok(())
}
