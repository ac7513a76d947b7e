use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::store::CellState;
use crate::value::Value;

/// Emitted state of one cell at one step.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EmitFrame {
    pub step: usize,
    pub time: f64,
    /// Values of every schema path declared with `emit`, keyed by `/a/b` path.
    pub values: BTreeMap<String, Value>,
    pub bulk: BTreeMap<String, i64>,
    pub collection_sizes: BTreeMap<String, usize>,
}

fn default_schema_version() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub agent_id: String,
    pub steps: usize,
    pub emit_every: usize,
    pub final_time: f64,
    pub frames: Vec<EmitFrame>,
    /// Steps in which at least one species was requested beyond supply.
    #[serde(default)]
    pub shortfall_events: usize,
    #[serde(default)]
    pub divided: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub daughter_ids: Vec<String>,
}

pub fn collect_emit_frame(step: usize, state: &CellState, schema: &Schema) -> EmitFrame {
    let values = schema
        .values()
        .filter(|(_, entry)| entry.emit)
        .filter_map(|(path, _)| {
            state
                .value(path)
                .map(|value| (path.to_string(), value.clone()))
        })
        .collect();
    let bulk = state
        .bulk
        .ids()
        .iter()
        .cloned()
        .zip(state.bulk.counts().iter().copied())
        .collect();
    let collection_sizes = state
        .collections
        .iter()
        .filter(|(name, _)| schema.collection(name).is_none_or(|c| c.emit))
        .map(|(name, collection)| (name.clone(), collection.len()))
        .collect();
    EmitFrame {
        step,
        time: state.time,
        values,
        bulk,
        collection_sizes,
    }
}
