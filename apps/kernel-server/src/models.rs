// apps/kernel-server/src/models.rs
// Purpose: The authoritative task document and its building blocks.
// Architecture: Shared Data Layer
// Dependencies: Serde

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Geometric payload for a shape. Rectangles are the only shape kind
/// carried by the core; other geometries are opaque to this layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ShapeRect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShapeData {
    pub id: i64,
    /// Every label that currently references this shape. A shape may
    /// have more than one owner.
    pub label: Vec<i64>,
    pub manual: bool,
    pub shape: ShapeRect,
}

fn default_sentinel() -> i64 {
    -1
}

/// A label attached to one item. Scalar id-like fields use `-1` as the
/// "absent" sentinel so `ChangeLabel`'s default-suppression merge can
/// tell a real value from an unset one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LabelData {
    #[serde(default = "default_sentinel")]
    pub id: i64,
    #[serde(default = "default_sentinel")]
    pub item: i64,
    #[serde(default, rename = "type")]
    pub label_type: String,
    #[serde(default)]
    pub category: Vec<i64>,
    #[serde(default)]
    pub attributes: HashMap<String, Vec<i64>>,
    #[serde(default = "default_sentinel")]
    pub parent: i64,
    #[serde(default)]
    pub children: Vec<i64>,
    #[serde(default)]
    pub shapes: Vec<i64>,
    #[serde(default = "default_sentinel")]
    pub track: i64,
    #[serde(default = "default_sentinel")]
    pub order: i64,
}

impl LabelData {
    /// Default-suppression merge: a field from `props` overwrites the
    /// matching field on `self` only when it carries a non-default
    /// value (`>= 0` for the id-like integers, non-empty for strings,
    /// sequences and mappings). Load-bearing for wire compatibility;
    /// do not simplify to a blind overwrite.
    pub fn merge_default_suppressed(&self, props: &LabelData) -> LabelData {
        let mut merged = self.clone();
        if props.id >= 0 {
            merged.id = props.id;
        }
        if props.item >= 0 {
            merged.item = props.item;
        }
        if !props.label_type.is_empty() {
            merged.label_type = props.label_type.clone();
        }
        if !props.category.is_empty() {
            merged.category = props.category.clone();
        }
        if !props.attributes.is_empty() {
            merged.attributes = props.attributes.clone();
        }
        if props.parent >= 0 {
            merged.parent = props.parent;
        }
        if !props.children.is_empty() {
            merged.children = props.children.clone();
        }
        if !props.shapes.is_empty() {
            merged.shapes = props.shapes.clone();
        }
        if props.track >= 0 {
            merged.track = props.track;
        }
        if props.order >= 0 {
            merged.order = props.order;
        }
        merged
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemData {
    pub id: i64,
    pub index: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub labels: HashMap<i64, LabelData>,
    #[serde(default)]
    pub shapes: HashMap<i64, ShapeData>,
}

/// Monotonically increasing id/order counters for a task. None of
/// these may ever decrease once a task is loaded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatus {
    pub max_label_id: i64,
    pub max_shape_id: i64,
    pub max_order: i64,
}

/// Immutable-after-load task configuration. `extra` is the escape
/// hatch for media-specific viewer config JSON, which this layer
/// reads back verbatim but never interprets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub project_name: String,
    pub task_id: String,
    #[serde(default)]
    pub item_type: String,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// The authoritative per-task document. Cloning a `TaskData` is cheap:
/// `config` and `tracks` are reference-counted and `items` is a vector
/// of reference-counted items, so only the item touched by an update
/// is ever deep-copied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    pub config: Arc<TaskConfig>,
    pub status: TaskStatus,
    pub items: Vec<Arc<ItemData>>,
    #[serde(default)]
    pub tracks: Arc<HashMap<i64, serde_json::Value>>,
}

impl TaskData {
    /// Every shape id referenced in `Label.Shapes` exists in the same
    /// item's `Shapes` map, and every label id in `Shape.Label` exists
    /// in the same item's `Labels` map.
    #[cfg(test)]
    pub fn check_referential_integrity(&self) -> bool {
        for item in &self.items {
            for label in item.labels.values() {
                for shape_id in &label.shapes {
                    if !item.shapes.contains_key(shape_id) {
                        return false;
                    }
                }
            }
            for shape in item.shapes.values() {
                for label_id in &shape.label {
                    if !item.labels.contains_key(label_id) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Client-local selection/view state. Never persisted, never
/// broadcast; the core applies `UserAction`s to a scratch value of
/// this type purely to exercise wire conformance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserData {
    #[serde(default)]
    pub selected_item: i64,
}

/// Client-local session state (current item index). Same
/// pass-through treatment as `UserData`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    #[serde(default)]
    pub item_index: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_suppresses_defaults() {
        let existing = LabelData {
            id: 3,
            item: 0,
            label_type: "box".into(),
            category: vec![1],
            attributes: HashMap::new(),
            parent: -1,
            children: vec![],
            shapes: vec![7],
            track: -1,
            order: 2,
        };
        let mut attrs = HashMap::new();
        attrs.insert("a".to_string(), vec![1]);
        let props = LabelData {
            id: -1,
            item: -1,
            label_type: String::new(),
            category: vec![],
            attributes: attrs,
            parent: 5,
            children: vec![9],
            shapes: vec![],
            track: -1,
            order: -1,
        };
        let merged = existing.merge_default_suppressed(&props);
        assert_eq!(merged.id, 3, "id untouched when props.id is the sentinel");
        assert_eq!(merged.label_type, "box", "empty string must not overwrite");
        assert_eq!(merged.category, vec![1], "empty sequence must not overwrite");
        assert_eq!(merged.attributes.get("a"), Some(&vec![1]));
        assert_eq!(merged.parent, 5, "non-default scalar overwrites");
        assert_eq!(merged.children, vec![9]);
        assert_eq!(merged.shapes, vec![7], "empty shapes must not clear existing");
        assert_eq!(merged.order, 2);
    }
}
