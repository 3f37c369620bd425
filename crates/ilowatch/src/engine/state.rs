use std::collections::BTreeMap;

use serde::Serialize;

/// Platform an entity belongs to, mirroring Home Assistant's platform names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Sensor,
    BinarySensor,
    Button,
}

/// A single entity value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// Materialised state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub name: String,
    pub platform: Platform,

    /// `None` is reported as "unknown".
    pub value: Option<StateValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,

    /// Set while the source behind this entity failed its last refresh.
    pub stale: bool,

    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: BTreeMap<String, EntityState>,
}
