//! Structural validation of uploaded course files.
//!
//! A course file is a JSON array of exactly six slots:
//!
//! | slot | kind   | meaning                 |
//! |------|--------|-------------------------|
//! | 0    | object | placed objects          |
//! | 1    | object | checkpoints             |
//! | 2    | string | tag                     |
//! | 3    | number | format revision         |
//! | 4    | string | course name             |
//! | 5    | object | additional objects      |
//!
//! "object" slots accept either a JSON object or a JSON array. Only the shape
//! is checked here; the contents are opaque.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const SLOT_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Object,
    String,
    Number,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Object => write!(f, "object"),
            SlotKind::String => write!(f, "string"),
            SlotKind::Number => write!(f, "number"),
        }
    }
}

const LAYOUT: [SlotKind; SLOT_COUNT] = [
    SlotKind::Object,
    SlotKind::Object,
    SlotKind::String,
    SlotKind::Number,
    SlotKind::String,
    SlotKind::Object,
];

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadShapeError {
    #[error("course file is not valid JSON")]
    InvalidJson,

    #[error("course file must be an array, got {found}")]
    NotAnArray { found: &'static str },

    #[error("course file must have 6 slots, got {found}")]
    WrongLength { found: usize },

    #[error("slot {index} must be {expected}, got {found}")]
    WrongSlotType {
        index: usize,
        expected: SlotKind,
        found: &'static str,
    },
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structured container slot
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

impl Container {
    pub fn len(&self) -> usize {
        match self {
            Container::Object(map) => map.len(),
            Container::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseFilePayload {
    pub objects: Container,
    pub checkpoints: Container,
    pub tag: String,
    pub revision: f64,
    pub name: String,
    pub extra_objects: Container,
}

/// Figures shown on the stats page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub name: String,
    pub object_count: usize,
    pub checkpoints_count: usize,
}

impl CourseFilePayload {
    pub fn decode(value: &Value) -> Result<Self, PayloadShapeError> {
        let slots = value.as_array().ok_or(PayloadShapeError::NotAnArray {
            found: json_type(value),
        })?;
        if slots.len() != SLOT_COUNT {
            return Err(PayloadShapeError::WrongLength { found: slots.len() });
        }
        for (index, (slot, expected)) in slots.iter().zip(LAYOUT).enumerate() {
            let matches = match expected {
                SlotKind::Object => slot.is_object() || slot.is_array(),
                SlotKind::String => slot.is_string(),
                SlotKind::Number => slot.is_number(),
            };
            if !matches {
                return Err(PayloadShapeError::WrongSlotType {
                    index,
                    expected,
                    found: json_type(slot),
                });
            }
        }

        Ok(Self {
            objects: container(&slots[0]),
            checkpoints: container(&slots[1]),
            tag: slots[2].as_str().unwrap_or_default().to_string(),
            revision: slots[3].as_f64().unwrap_or_default(),
            name: slots[4].as_str().unwrap_or_default().to_string(),
            extra_objects: container(&slots[5]),
        })
    }

    /// Decode raw (already decompressed) bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PayloadShapeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|_| PayloadShapeError::InvalidJson)?;
        Self::decode(&value)
    }

    pub fn is_valid(value: &Value) -> bool {
        Self::decode(value).is_ok()
    }

    pub fn summary(&self) -> CourseSummary {
        CourseSummary {
            name: self.name.clone(),
            object_count: self.objects.len() + self.extra_objects.len(),
            checkpoints_count: self.checkpoints.len(),
        }
    }
}

// Only called after the slot kind has been checked
fn container(value: &Value) -> Container {
    match value {
        Value::Object(map) => Container::Object(map.clone()),
        Value::Array(items) => Container::Array(items.clone()),
        _ => Container::Array(Vec::new()),
    }
}
