use serde_json::{Map, Value};
use xxhash_rust::xxh3::xxh3_128;

use crate::models::File;

/// Derives a stable upload id from the request, so that re-creating the same
/// logical upload resolves to the same id and resumes it.
pub fn default_upload_id(
    user_id: Option<&str>,
    original_name: &str,
    size: Option<u64>,
    metadata: &Map<String, Value>,
) -> String {
    let material = serde_json::json!([
        user_id.unwrap_or_default(),
        original_name,
        size,
        metadata,
    ]);
    format!("{:032x}", xxh3_128(material.to_string().as_bytes()))
}

/// Physical name for an upload: `<user>/<id>` when owned, else `<id>`.
pub fn default_name(file: &File) -> String {
    match file.user_id.as_deref() {
        Some(user) if !user.is_empty() => format!("{}/{}", user, file.id),
        _ => file.id.clone(),
    }
}
