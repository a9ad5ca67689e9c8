//! Trigger events delivered by the event-dispatch layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::Fields;

/// An object finished uploading to a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFinalized {
    pub bucket: String,
    pub object_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// A document was deleted; `prior_field_values` is its last content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDeleted {
    pub document_path: String,
    #[serde(default)]
    pub prior_field_values: Option<Fields>,
}

/// A document was created (`prior_field_values` absent) or updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWritten {
    pub document_path: String,
    pub field_values: Fields,
    #[serde(default)]
    pub prior_field_values: Option<Fields>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    ObjectFinalized(ObjectFinalized),
    DocumentDeleted(DocumentDeleted),
    DocumentWritten(DocumentWritten),
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::ObjectFinalized(event) => {
                write!(f, "object-finalized {}/{}", event.bucket, event.object_name)
            }
            TriggerEvent::DocumentDeleted(event) => {
                write!(f, "document-deleted {}", event.document_path)
            }
            TriggerEvent::DocumentWritten(event) => {
                write!(f, "document-written {}", event.document_path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object_finalized() {
        let event: TriggerEvent = serde_json::from_value(json!({
            "kind": "object_finalized",
            "bucket": "photos",
            "objectName": "images/bike1.jpg",
            "contentType": "image/jpeg"
        }))
        .unwrap();

        assert_eq!(
            event,
            TriggerEvent::ObjectFinalized(ObjectFinalized {
                bucket: "photos".to_string(),
                object_name: "images/bike1.jpg".to_string(),
                content_type: Some("image/jpeg".to_string()),
            })
        );
        assert_eq!(event.to_string(), "object-finalized photos/images/bike1.jpg");
    }

    #[test]
    fn test_parse_document_deleted_without_prior_values() {
        let event: TriggerEvent = serde_json::from_value(json!({
            "kind": "document_deleted",
            "documentPath": "users/u1/motorcycles/m1"
        }))
        .unwrap();

        match event {
            TriggerEvent::DocumentDeleted(deleted) => {
                assert_eq!(deleted.document_path, "users/u1/motorcycles/m1");
                assert!(deleted.prior_field_values.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
