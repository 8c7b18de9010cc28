// apps/kernel-server/src/error.rs
// Purpose: Typed error taxonomy for the sync core.
// Architecture: Cross-cutting
// Dependencies: thiserror

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to decode action from the wire: {0}")]
    WireDecode(#[from] serde_json::Error),

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("item index {index} out of range (task has {len} items)")]
    ItemOutOfRange { index: i64, len: usize },

    #[error("shape {shape} not found in item {item}")]
    ShapeNotFound { item: i64, shape: i64 },

    #[error("label {label} not found in item {item}")]
    LabelNotFound { item: i64, label: i64 },

    #[error("socket read error: {0}")]
    ReadIO(String),

    #[error("socket write error: {0}")]
    WriteIO(String),

    #[error("deadline exceeded")]
    Deadline,

    #[error("storage error: {0}")]
    StorageIO(String),

    #[error("task loader produced no data for {project_name}/{task_id}")]
    LoaderMissing {
        project_name: String,
        task_id: String,
    },
}
