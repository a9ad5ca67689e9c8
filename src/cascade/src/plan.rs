//! Compiled-in deletion plans: which descendants a deleted root record owns.
//!
//! | Root record                                                    | Entries |
//! |----------------------------------------------------------------|---------|
//! | `users/{uid}/motorcycles/{motorcycleId}`                        | blobs under the root path; drain `users/{uid}/work_orders/{motorcycleId}/forms` |
//! | `users/{uid}/work_orders/{motorcycleId}/forms/{woId}`           | document `users/{uid}/work_orders$metadata/{woId}`; drain `.../file_repos/{woId}/images`; drain `.../cost_sheets/{woId}/costs` |
//! | `users/{uid}/work_orders/{woId}/file_repos/{formId}/images/{id}` | the record's primary and derivative blobs |

use common::asset::Asset;
use common::document::{CollectionPath, DocumentPath, DocumentStoreError, Fields};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Motorcycle,
    WorkOrderForm,
    WorkOrderImage,
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootKind::Motorcycle => write!(f, "motorcycle"),
            RootKind::WorkOrderForm => write!(f, "work-order-form"),
            RootKind::WorkOrderImage => write!(f, "work-order-image"),
        }
    }
}

/// One independent sub-deletion of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEntry {
    /// Drain a child collection.
    Drain(CollectionPath),
    /// Delete a single sibling document.
    DeleteDocument(DocumentPath),
    /// Delete every blob under a prefix; `bucket` falls back to the default.
    DeletePrefix { bucket: Option<String>, prefix: String },
    /// Delete specific blobs.
    DeleteObjects { bucket: Option<String>, keys: Vec<String> },
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanEntry::Drain(collection) => write!(f, "drain {collection}"),
            PlanEntry::DeleteDocument(path) => write!(f, "delete-document {path}"),
            PlanEntry::DeletePrefix { bucket, prefix } => {
                write!(f, "delete-prefix {}:{prefix}", bucket.as_deref().unwrap_or("<default>"))
            }
            PlanEntry::DeleteObjects { bucket, keys } => {
                write!(
                    f,
                    "delete-objects {}:{}",
                    bucket.as_deref().unwrap_or("<default>"),
                    keys.join(",")
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionPlan {
    pub root: DocumentPath,
    pub kind: RootKind,
    pub entries: Vec<PlanEntry>,
}

impl DeletionPlan {
    /// Look up the plan for a deleted root record.
    ///
    /// `Ok(None)` when the path matches no root type, or when an image record
    /// carries no asset payload.
    pub fn for_root(
        root: &DocumentPath,
        prior: Option<&Fields>,
    ) -> Result<Option<Self>, DocumentStoreError> {
        let segments: Vec<&str> = root.as_str().split('/').collect();
        let asset = prior.and_then(Asset::from_fields);

        let (kind, entries) = match segments.as_slice() {
            ["users", uid, "motorcycles", motorcycle_id] => {
                let forms = CollectionPath::parse(format!(
                    "users/{uid}/work_orders/{motorcycle_id}/forms"
                ))?;
                let bucket = asset.and_then(|asset| asset.bucket);
                (
                    RootKind::Motorcycle,
                    vec![
                        PlanEntry::DeletePrefix {
                            bucket,
                            prefix: root.to_string(),
                        },
                        PlanEntry::Drain(forms),
                    ],
                )
            }
            ["users", uid, "work_orders", motorcycle_id, "forms", wo_id] => {
                let work_orders = format!("users/{uid}/work_orders/{motorcycle_id}");
                (
                    RootKind::WorkOrderForm,
                    vec![
                        PlanEntry::DeleteDocument(DocumentPath::parse(format!(
                            "users/{uid}/work_orders$metadata/{wo_id}"
                        ))?),
                        PlanEntry::Drain(CollectionPath::parse(format!(
                            "{work_orders}/file_repos/{wo_id}/images"
                        ))?),
                        PlanEntry::Drain(CollectionPath::parse(format!(
                            "{work_orders}/cost_sheets/{wo_id}/costs"
                        ))?),
                    ],
                )
            }
            ["users", _, "work_orders", _, "file_repos", _, "images", _] => {
                let Some(asset) = asset else {
                    return Ok(None);
                };
                let mut keys = vec![asset.primary];
                keys.extend(asset.derivative);
                (
                    RootKind::WorkOrderImage,
                    vec![PlanEntry::DeleteObjects {
                        bucket: asset.bucket,
                        keys,
                    }],
                )
            }
            _ => return Ok(None),
        };

        Ok(Some(Self {
            root: root.clone(),
            kind,
            entries,
        }))
    }
}
