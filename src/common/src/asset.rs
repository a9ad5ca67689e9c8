//! The asset field contract shared by the derivative and cascade engines.
//!
//! A metadata record stores its asset under the `image` field:
//!
//! ```json
//! { "image": {
//!     "imageUrl": "users/u1/motorcycles/m1/bike.jpg",
//!     "imagePublicUrl": "https://...",
//!     "thumbnailUrl": "users/u1/motorcycles/m1/thumb_bike.jpg",
//!     "thumbnailPublicUrl": "https://...",
//!     "bucket": "photos" } }
//! ```
//!
//! `thumbnailPublicUrl` is the completion marker: once present the derivative
//! is never generated again.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{FieldUpdates, Fields};

/// Name of the record field holding the asset.
pub const ASSET_FIELD: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(rename = "imageUrl")]
    pub primary: String,
    #[serde(rename = "imagePublicUrl", default, skip_serializing_if = "Option::is_none")]
    pub primary_access: Option<String>,
    #[serde(rename = "thumbnailUrl", default, skip_serializing_if = "Option::is_none")]
    pub derivative: Option<String>,
    #[serde(rename = "thumbnailPublicUrl", default, skip_serializing_if = "Option::is_none")]
    pub derivative_access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Asset {
    /// Read the asset payload of a record; `None` when absent or malformed.
    pub fn from_fields(fields: &Fields) -> Option<Self> {
        let value = fields.get(ASSET_FIELD)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Whether the derivative has been generated and linked.
    pub fn is_linked(&self) -> bool {
        self.derivative_access.is_some()
    }

    /// Dotted field updates writing every populated location and descriptor.
    pub fn to_updates(&self) -> FieldUpdates {
        let mut updates = FieldUpdates::new();
        let mut put = |field: &str, value: Option<&String>| {
            if let Some(value) = value {
                updates.insert(
                    format!("{ASSET_FIELD}.{field}"),
                    Value::String(value.clone()),
                );
            }
        };
        put("imageUrl", Some(&self.primary));
        put("imagePublicUrl", self.primary_access.as_ref());
        put("thumbnailUrl", self.derivative.as_ref());
        put("thumbnailPublicUrl", self.derivative_access.as_ref());
        put("bucket", self.bucket.as_ref());
        put("contentType", self.content_type.as_ref());
        updates
    }
}

/// Directory part of an object key, `None` for keys at the bucket root.
pub fn dirname(key: &str) -> Option<&str> {
    key.rsplit_once('/').map(|(dir, _)| dir).filter(|dir| !dir.is_empty())
}

/// File name part of an object key.
pub fn basename(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}

/// Derivative key for a primary key: `dirname + "/" + prefix + basename`.
pub fn derivative_key(primary: &str, prefix: &str) -> String {
    match dirname(primary) {
        Some(dir) => format!("{dir}/{prefix}{}", basename(primary)),
        None => format!("{prefix}{}", basename(primary)),
    }
}

/// Whether an object name already carries the derivative prefix.
pub fn is_derivative_key(key: &str, prefix: &str) -> bool {
    basename(key).starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derivative_key_naming() {
        assert_eq!(derivative_key("images/bike1.jpg", "thumb_"), "images/thumb_bike1.jpg");
        assert_eq!(
            derivative_key("users/u1/motorcycles/m1/photo.png", "thumb_"),
            "users/u1/motorcycles/m1/thumb_photo.png"
        );
        assert_eq!(derivative_key("bike1.jpg", "thumb_"), "thumb_bike1.jpg");
    }

    #[test]
    fn test_derivative_guard_looks_at_basename_only() {
        assert!(is_derivative_key("images/thumb_bike1.jpg", "thumb_"));
        assert!(!is_derivative_key("thumb_dir/bike1.jpg", "thumb_"));
    }

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("images/bike1.jpg"), Some("images"));
        assert_eq!(dirname("bike1.jpg"), None);
        assert_eq!(dirname("/bike1.jpg"), None);
    }

    #[test]
    fn test_asset_from_fields() {
        let fields = json!({
            "name": "bike",
            "image": {
                "imageUrl": "images/bike1.jpg",
                "thumbnailUrl": "images/thumb_bike1.jpg",
                "bucket": "photos"
            }
        })
        .as_object()
        .cloned()
        .unwrap();

        let asset = Asset::from_fields(&fields).unwrap();
        assert_eq!(asset.primary, "images/bike1.jpg");
        assert_eq!(asset.derivative.as_deref(), Some("images/thumb_bike1.jpg"));
        assert_eq!(asset.bucket.as_deref(), Some("photos"));
        assert!(!asset.is_linked());

        let empty = json!({ "name": "bike" }).as_object().cloned().unwrap();
        assert!(Asset::from_fields(&empty).is_none());
    }

    #[test]
    fn test_to_updates_uses_dotted_keys() {
        let asset = Asset {
            primary: "images/bike1.jpg".to_string(),
            primary_access: Some("https://cdn/images/bike1.jpg".to_string()),
            derivative: Some("images/thumb_bike1.jpg".to_string()),
            derivative_access: Some("https://cdn/images/thumb_bike1.jpg".to_string()),
            bucket: Some("photos".to_string()),
            content_type: None,
        };

        let updates = asset.to_updates();
        assert_eq!(updates.len(), 5);
        assert_eq!(updates["image.imageUrl"], json!("images/bike1.jpg"));
        assert_eq!(
            updates["image.thumbnailPublicUrl"],
            json!("https://cdn/images/thumb_bike1.jpg")
        );
        assert_eq!(updates["image.bucket"], json!("photos"));
        assert!(!updates.contains_key("image.contentType"));
    }
}
