// apps/kernel-server/src/action.rs
// Purpose: The tagged action family and the pure state-update methods
// that give task actions their immutable-update semantics.
// Architecture: Domain Logic
// Dependencies: Serde, the data model

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::{ItemData, LabelData, ShapeData, ShapeRect, SessionData, TaskData, TaskStatus, UserData};

/// The envelope every wire action carries, independent of its concrete
/// shape. `time` is stamped by the hub for task actions and by the
/// decoder for everything else (see `wire::decode_one`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddLabelAction {
    #[serde(rename = "itemIndex")]
    pub item_index: i64,
    pub label: LabelData,
    #[serde(default)]
    pub shapes: Vec<ShapeRect>,
}

impl AddLabelAction {
    pub fn apply(&self, state: &TaskData) -> Result<TaskData, SyncError> {
        let idx = self.item_index;
        if idx < 0 || idx as usize >= state.items.len() {
            return Err(SyncError::ItemOutOfRange {
                index: idx,
                len: state.items.len(),
            });
        }
        let item = &state.items[idx as usize];

        let label_id = state.status.max_label_id + 1;
        let first_shape_id = state.status.max_shape_id + 1;
        let order = state.status.max_order + 1;

        let mut shapes = item.shapes.clone();
        let mut new_shape_ids = Vec::with_capacity(self.shapes.len());
        for (i, rect) in self.shapes.iter().enumerate() {
            let shape_id = first_shape_id + i as i64;
            shapes.insert(
                shape_id,
                ShapeData {
                    id: shape_id,
                    label: vec![label_id],
                    manual: true,
                    shape: *rect,
                },
            );
            new_shape_ids.push(shape_id);
        }
        let max_shape_id = new_shape_ids.last().copied().unwrap_or(state.status.max_shape_id);

        let mut owned_shapes = self.label.shapes.clone();
        owned_shapes.extend(new_shape_ids);
        let mut label = self.label.clone();
        label.id = label_id;
        label.item = idx;
        label.order = order;
        label.shapes = owned_shapes;

        let mut labels = item.labels.clone();
        labels.insert(label_id, label);

        let new_item = ItemData {
            id: item.id,
            index: item.index,
            url: item.url.clone(),
            labels,
            shapes,
        };
        let mut items = state.items.clone();
        items[idx as usize] = Arc::new(new_item);

        Ok(TaskData {
            config: state.config.clone(),
            status: TaskStatus {
                max_label_id: label_id,
                max_shape_id,
                max_order: order,
            },
            items,
            tracks: state.tracks.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeShapeAction {
    #[serde(rename = "itemIndex")]
    pub item_index: i64,
    #[serde(rename = "shapeId")]
    pub shape_id: i64,
    pub props: ShapeRect,
}

impl ChangeShapeAction {
    pub fn apply(&self, state: &TaskData) -> Result<TaskData, SyncError> {
        let idx = self.item_index;
        if idx < 0 || idx as usize >= state.items.len() {
            return Err(SyncError::ItemOutOfRange {
                index: idx,
                len: state.items.len(),
            });
        }
        let item = &state.items[idx as usize];
        let existing = item.shapes.get(&self.shape_id).ok_or(SyncError::ShapeNotFound {
            item: idx,
            shape: self.shape_id,
        })?;

        let mut shapes = item.shapes.clone();
        shapes.insert(
            self.shape_id,
            ShapeData {
                shape: self.props,
                ..existing.clone()
            },
        );

        let new_item = ItemData {
            id: item.id,
            index: item.index,
            url: item.url.clone(),
            labels: item.labels.clone(),
            shapes,
        };
        let mut items = state.items.clone();
        items[idx as usize] = Arc::new(new_item);

        Ok(TaskData {
            config: state.config.clone(),
            status: state.status,
            items,
            tracks: state.tracks.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeLabelAction {
    #[serde(rename = "itemIndex")]
    pub item_index: i64,
    #[serde(rename = "labelId")]
    pub label_id: i64,
    pub props: LabelData,
}

impl ChangeLabelAction {
    pub fn apply(&self, state: &TaskData) -> Result<TaskData, SyncError> {
        let idx = self.item_index;
        if idx < 0 || idx as usize >= state.items.len() {
            return Err(SyncError::ItemOutOfRange {
                index: idx,
                len: state.items.len(),
            });
        }
        let item = &state.items[idx as usize];
        let existing = item.labels.get(&self.label_id).ok_or(SyncError::LabelNotFound {
            item: idx,
            label: self.label_id,
        })?;
        let merged = existing.merge_default_suppressed(&self.props);

        let mut labels = item.labels.clone();
        labels.insert(self.label_id, merged);

        let new_item = ItemData {
            id: item.id,
            index: item.index,
            url: item.url.clone(),
            labels,
            shapes: item.shapes.clone(),
        };
        let mut items = state.items.clone();
        items[idx as usize] = Arc::new(new_item);

        Ok(TaskData {
            config: state.config.clone(),
            status: state.status,
            items,
            tracks: state.tracks.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteLabelAction {
    #[serde(rename = "itemIndex")]
    pub item_index: i64,
    #[serde(rename = "labelId")]
    pub label_id: i64,
}

impl DeleteLabelAction {
    pub fn apply(&self, state: &TaskData) -> Result<TaskData, SyncError> {
        let idx = self.item_index;
        if idx < 0 || idx as usize >= state.items.len() {
            return Err(SyncError::ItemOutOfRange {
                index: idx,
                len: state.items.len(),
            });
        }
        let item = &state.items[idx as usize];
        let label = item.labels.get(&self.label_id).ok_or(SyncError::LabelNotFound {
            item: idx,
            label: self.label_id,
        })?;

        let mut labels = item.labels.clone();
        labels.remove(&self.label_id);

        // Deletes every shape the label references, even ones another
        // label might also reference. Matches the observed behavior
        // of the system this core was distilled from; see DESIGN.md.
        let mut shapes = item.shapes.clone();
        for shape_id in &label.shapes {
            shapes.remove(shape_id);
        }

        let new_item = ItemData {
            id: item.id,
            index: item.index,
            url: item.url.clone(),
            labels,
            shapes,
        };
        let mut items = state.items.clone();
        items[idx as usize] = Arc::new(new_item);

        Ok(TaskData {
            config: state.config.clone(),
            status: state.status,
            items,
            tracks: state.tracks.clone(),
        })
    }
}

/// Reserved extension points: identity update in the core contract.
/// `extra` absorbs whatever fields a future implementation attaches
/// without the core needing to know their shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TagImageAction {
    #[serde(rename = "itemIndex", default)]
    pub item_index: i64,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl TagImageAction {
    pub fn apply(&self, state: &TaskData) -> Result<TaskData, SyncError> {
        Ok(state.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LinkLabelsAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl LinkLabelsAction {
    pub fn apply(&self, state: &TaskData) -> Result<TaskData, SyncError> {
        Ok(state.clone())
    }
}

/// A task action's payload, already resolved to its concrete type.
#[derive(Debug, Clone)]
pub enum TaskActionPayload {
    AddLabel(AddLabelAction),
    ChangeShape(ChangeShapeAction),
    ChangeLabel(ChangeLabelAction),
    DeleteLabel(DeleteLabelAction),
    TagImage(TagImageAction),
    LinkLabels(LinkLabelsAction),
}

/// A task action bound to the envelope it arrived with. This is the
/// unit the hub stamps, applies, logs and broadcasts.
#[derive(Debug, Clone)]
pub struct CommittedTaskAction {
    pub base: GenericAction,
    pub payload: TaskActionPayload,
}

impl CommittedTaskAction {
    pub fn apply(&self, state: &TaskData) -> Result<TaskData, SyncError> {
        match &self.payload {
            TaskActionPayload::AddLabel(a) => a.apply(state),
            TaskActionPayload::ChangeShape(a) => a.apply(state),
            TaskActionPayload::ChangeLabel(a) => a.apply(state),
            TaskActionPayload::DeleteLabel(a) => a.apply(state),
            TaskActionPayload::TagImage(a) => a.apply(state),
            TaskActionPayload::LinkLabels(a) => a.apply(state),
        }
    }

    /// Builds the outbound wire object: the envelope fields merged
    /// with the payload's own fields. Kept as an explicit merge rather
    /// than a derived `Serialize` on the whole enum, since the wire
    /// format has no internal tag field distinct from `type`.
    pub fn to_wire_value(&self) -> serde_json::Value {
        let mut value = match &self.payload {
            TaskActionPayload::AddLabel(a) => serde_json::to_value(a),
            TaskActionPayload::ChangeShape(a) => serde_json::to_value(a),
            TaskActionPayload::ChangeLabel(a) => serde_json::to_value(a),
            TaskActionPayload::DeleteLabel(a) => serde_json::to_value(a),
            TaskActionPayload::TagImage(a) => serde_json::to_value(a),
            TaskActionPayload::LinkLabels(a) => serde_json::to_value(a),
        }
        .unwrap_or_else(|_| serde_json::json!({}));

        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".to_string(), serde_json::Value::String(self.base.action_type.clone()));
            obj.insert("sessionId".to_string(), serde_json::Value::String(self.base.session_id.clone()));
            obj.insert("time".to_string(), serde_json::Value::String(self.base.time.clone()));
        }
        value
    }
}

/// Client-local, non-broadcast actions. The core applies them to a
/// scratch value and discards the result; see `models::UserData`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChangeSelectAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImageZoomAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToggleAssistantViewAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MoveCameraAndTargetAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum UserActionPayload {
    ChangeSelect(ChangeSelectAction),
    ImageZoom(ImageZoomAction),
    ToggleAssistantView(ToggleAssistantViewAction),
    MoveCameraAndTarget(MoveCameraAndTargetAction),
}

impl UserActionPayload {
    /// Pass-through: the core never interprets user actions, it only
    /// proves they decode and apply cleanly.
    pub fn apply(&self, state: &UserData) -> UserData {
        state.clone()
    }
}

/// Session-local, non-broadcast actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoadItemAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InitSessionAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpdateAllAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Session-scoped item navigation. Categorized alongside `LoadItem` /
/// `InitSession` / `UpdateAll` — see DESIGN.md's Open Question note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GoToItemAction {
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum SessionActionPayload {
    LoadItem(LoadItemAction),
    InitSession(InitSessionAction),
    UpdateAll(UpdateAllAction),
    GoToItem(GoToItemAction),
}

impl SessionActionPayload {
    pub fn apply(&self, state: &SessionData) -> SessionData {
        state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_task() -> TaskData {
        TaskData {
            config: Arc::new(crate::models::TaskConfig::default()),
            status: TaskStatus::default(),
            items: vec![Arc::new(ItemData {
                id: 0,
                index: 0,
                url: "image0.jpg".into(),
                labels: HashMap::new(),
                shapes: HashMap::new(),
            })],
            tracks: Arc::new(HashMap::new()),
        }
    }

    // S1: AddLabel commits.
    #[test]
    fn add_label_allocates_ids_and_links_shapes() {
        let before = empty_task();
        let action = AddLabelAction {
            item_index: 0,
            label: LabelData::default(),
            shapes: vec![ShapeRect { x1: 1.0, y1: 2.0, x2: 3.0, y2: 4.0 }],
        };

        let after = action.apply(&before).expect("add label should succeed");

        assert_eq!(
            after.status,
            TaskStatus { max_label_id: 1, max_shape_id: 1, max_order: 1 }
        );
        let item = &after.items[0];
        let shape = item.shapes.get(&1).expect("shape 1 must exist");
        assert_eq!(shape.label, vec![1]);
        assert!(shape.manual);
        assert_eq!(shape.shape, ShapeRect { x1: 1.0, y1: 2.0, x2: 3.0, y2: 4.0 });
        let label = item.labels.get(&1).expect("label 1 must exist");
        assert_eq!(label.shapes, vec![1]);
        assert_eq!(label.order, 1);

        // Immutability: the pre-state must be untouched.
        assert_eq!(before.status, TaskStatus::default());
        assert!(before.items[0].labels.is_empty());
        assert!(before.items[0].shapes.is_empty());
    }

    #[test]
    fn add_label_rejects_out_of_range_item() {
        let before = empty_task();
        let action = AddLabelAction {
            item_index: 5,
            label: LabelData::default(),
            shapes: vec![],
        };
        let result = action.apply(&before);
        assert!(matches!(result, Err(SyncError::ItemOutOfRange { index: 5, len: 1 })));
    }

    // S2: ChangeShape on a shape id that doesn't exist.
    #[test]
    fn change_shape_on_missing_shape_errors_without_mutating() {
        let before = empty_task();
        let added = AddLabelAction {
            item_index: 0,
            label: LabelData::default(),
            shapes: vec![ShapeRect { x1: 1.0, y1: 2.0, x2: 3.0, y2: 4.0 }],
        }
        .apply(&before)
        .unwrap();

        let action = ChangeShapeAction {
            item_index: 0,
            shape_id: 999,
            props: ShapeRect { x1: 9.0, y1: 9.0, x2: 9.0, y2: 9.0 },
        };
        let result = action.apply(&added);
        assert!(matches!(
            result,
            Err(SyncError::ShapeNotFound { item: 0, shape: 999 })
        ));
        assert_eq!(added.items[0].shapes.len(), 1, "state must be unchanged after a failed apply");
    }

    // S6: DeleteLabel removes every shape it owns.
    #[test]
    fn delete_label_removes_owned_shapes() {
        let before = empty_task();
        let added = AddLabelAction {
            item_index: 0,
            label: LabelData::default(),
            shapes: vec![ShapeRect { x1: 1.0, y1: 2.0, x2: 3.0, y2: 4.0 }],
        }
        .apply(&before)
        .unwrap();

        let action = DeleteLabelAction { item_index: 0, label_id: 1 };
        let after = action.apply(&added).expect("delete should succeed");

        assert!(after.items[0].labels.is_empty());
        assert!(after.items[0].shapes.is_empty());
        assert_eq!(added.items[0].labels.len(), 1, "pre-state must survive the call");
    }

    #[test]
    fn delete_label_on_missing_label_errors() {
        let before = empty_task();
        let action = DeleteLabelAction { item_index: 0, label_id: 42 };
        let result = action.apply(&before);
        assert!(matches!(
            result,
            Err(SyncError::LabelNotFound { item: 0, label: 42 })
        ));
    }

    // Universal property 3: referential integrity survives a sequence
    // of task actions, including ones that delete part of what they
    // reference.
    #[test]
    fn referential_integrity_holds_across_a_sequence_of_actions() {
        let mut state = empty_task();
        assert!(state.check_referential_integrity());

        state = AddLabelAction {
            item_index: 0,
            label: LabelData::default(),
            shapes: vec![ShapeRect { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }, ShapeRect { x1: 1.0, y1: 1.0, x2: 2.0, y2: 2.0 }],
        }
        .apply(&state)
        .unwrap();
        assert!(state.check_referential_integrity());

        state = ChangeShapeAction {
            item_index: 0,
            shape_id: 1,
            props: ShapeRect { x1: 9.0, y1: 9.0, x2: 9.0, y2: 9.0 },
        }
        .apply(&state)
        .unwrap();
        assert!(state.check_referential_integrity());

        state = DeleteLabelAction { item_index: 0, label_id: 1 }.apply(&state).unwrap();
        assert!(state.check_referential_integrity());
        assert!(state.items[0].shapes.is_empty());
    }

    #[test]
    fn change_shape_replaces_geometry_only() {
        let before = empty_task();
        let added = AddLabelAction {
            item_index: 0,
            label: LabelData::default(),
            shapes: vec![ShapeRect { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }],
        }
        .apply(&before)
        .unwrap();

        let action = ChangeShapeAction {
            item_index: 0,
            shape_id: 1,
            props: ShapeRect { x1: 5.0, y1: 5.0, x2: 6.0, y2: 6.0 },
        };
        let after = action.apply(&added).unwrap();
        let shape = after.items[0].shapes.get(&1).unwrap();
        assert_eq!(shape.shape, ShapeRect { x1: 5.0, y1: 5.0, x2: 6.0, y2: 6.0 });
        assert_eq!(shape.label, vec![1], "owner list is untouched by ChangeShape");
    }
}
