// apps/kernel-server/src/wire.rs
// Purpose: JSON envelope decoding and action-type tag dispatch.
// Architecture: Wire Codec
// Dependencies: Serde, action

use crate::action::{CommittedTaskAction, GenericAction, SessionActionPayload, TaskActionPayload, UserActionPayload};
use crate::error::SyncError;

pub const ADD_LABEL: &str = "ADD_LABEL";
pub const CHANGE_LABEL_SHAPE: &str = "CHANGE_LABEL_SHAPE";
pub const CHANGE_LABEL_PROPS: &str = "CHANGE_LABEL_PROPS";
pub const DELETE_LABEL: &str = "DELETE_LABEL";
pub const TAG_IMAGE: &str = "TAG_IMAGE";
pub const LINK_LABELS: &str = "LINK_LABELS";
pub const CHANGE_SELECT: &str = "CHANGE_SELECT";
pub const IMAGE_ZOOM: &str = "IMAGE_ZOOM";
pub const TOGGLE_ASSISTANT_VIEW: &str = "TOGGLE_ASSISTANT_VIEW";
pub const MOVE_CAMERA_AND_TARGET: &str = "MOVE_CAMERA_AND_TARGET";
pub const LOAD_ITEM: &str = "LOAD_ITEM";
pub const INIT_SESSION: &str = "INIT_SESSION";
pub const UPDATE_ALL: &str = "UPDATE_ALL";
pub const GO_TO_ITEM: &str = "GO_TO_ITEM";

/// One decoded action, already classified into the capability set that
/// determines how a session routes it.
pub enum AnyAction {
    Task(CommittedTaskAction),
    User(GenericAction, UserActionPayload),
    Session(GenericAction, SessionActionPayload),
}

/// Splits the inbound text message into its array of raw action
/// objects. A failure here is the "batch envelope" decode failure the
/// session treats as fatal for the connection.
pub fn decode_batch(text: &str) -> Result<Vec<serde_json::Value>, SyncError> {
    serde_json::from_str(text).map_err(SyncError::from)
}

/// Decodes one action object: first into the envelope (to read the
/// tag), then into the concrete variant the tag selects. A failure
/// here is local to this one action and must not be treated as fatal
/// by the caller.
pub fn decode_one(value: serde_json::Value) -> Result<AnyAction, SyncError> {
    let mut base: GenericAction = serde_json::from_value(value.clone())?;
    // Task actions are timestamped by the hub at commit time so the
    // authoritative `time` matches application order; everything else
    // is stamped here, immediately on decode.
    if !matches!(
        base.action_type.as_str(),
        ADD_LABEL | CHANGE_LABEL_SHAPE | CHANGE_LABEL_PROPS | DELETE_LABEL | TAG_IMAGE | LINK_LABELS
    ) {
        base.time = now_string();
    }
    match base.action_type.as_str() {
        ADD_LABEL => Ok(AnyAction::Task(CommittedTaskAction {
            base,
            payload: TaskActionPayload::AddLabel(serde_json::from_value(value)?),
        })),
        CHANGE_LABEL_SHAPE => Ok(AnyAction::Task(CommittedTaskAction {
            base,
            payload: TaskActionPayload::ChangeShape(serde_json::from_value(value)?),
        })),
        CHANGE_LABEL_PROPS => Ok(AnyAction::Task(CommittedTaskAction {
            base,
            payload: TaskActionPayload::ChangeLabel(serde_json::from_value(value)?),
        })),
        DELETE_LABEL => Ok(AnyAction::Task(CommittedTaskAction {
            base,
            payload: TaskActionPayload::DeleteLabel(serde_json::from_value(value)?),
        })),
        TAG_IMAGE => Ok(AnyAction::Task(CommittedTaskAction {
            base,
            payload: TaskActionPayload::TagImage(serde_json::from_value(value)?),
        })),
        LINK_LABELS => Ok(AnyAction::Task(CommittedTaskAction {
            base,
            payload: TaskActionPayload::LinkLabels(serde_json::from_value(value)?),
        })),
        CHANGE_SELECT => Ok(AnyAction::User(base, UserActionPayload::ChangeSelect(serde_json::from_value(value)?))),
        IMAGE_ZOOM => Ok(AnyAction::User(base, UserActionPayload::ImageZoom(serde_json::from_value(value)?))),
        TOGGLE_ASSISTANT_VIEW => Ok(AnyAction::User(
            base,
            UserActionPayload::ToggleAssistantView(serde_json::from_value(value)?),
        )),
        MOVE_CAMERA_AND_TARGET => Ok(AnyAction::User(
            base,
            UserActionPayload::MoveCameraAndTarget(serde_json::from_value(value)?),
        )),
        LOAD_ITEM => Ok(AnyAction::Session(base, SessionActionPayload::LoadItem(serde_json::from_value(value)?))),
        INIT_SESSION => Ok(AnyAction::Session(
            base,
            SessionActionPayload::InitSession(serde_json::from_value(value)?),
        )),
        UPDATE_ALL => Ok(AnyAction::Session(base, SessionActionPayload::UpdateAll(serde_json::from_value(value)?))),
        GO_TO_ITEM => Ok(AnyAction::Session(base, SessionActionPayload::GoToItem(serde_json::from_value(value)?))),
        other => Err(SyncError::UnknownActionType(other.to_string())),
    }
}

pub fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Millisecond epoch timestamp used as the version component of a
/// storage key; see `storage::task_key`.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
