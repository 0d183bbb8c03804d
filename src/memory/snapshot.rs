//! Application state snapshot
//!
//! The core treats the dashboard state as an opaque JSON document. The only
//! structure it knows about is the set of top-level sections that older
//! stored snapshots may be missing (see [`StateSnapshot::backfill`]).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sections added after the first stored snapshots were written
const BACKFILLED_SECTIONS: &[&str] = &["memoryIntegration", "selfReflectionLog", "proactiveInitiatives"];

/// Full serializable application state at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot(Value);

impl StateSnapshot {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse the canonical text encoding. Only JSON objects are accepted.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom(format!(
                "state snapshot must be a JSON object, got {}",
                json_kind(&value)
            )));
        }
        Ok(Self(value))
    }

    /// Canonical text encoding (compact JSON)
    pub fn to_json(&self) -> String {
        self.0.to_string()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Fill top-level sections missing from an older snapshot with the
    /// default snapshot's values. Present sections are never touched.
    /// Returns the names of the sections that were added.
    pub fn backfill(&mut self, defaults: &StateSnapshot) -> Vec<&'static str> {
        let mut added = Vec::new();
        let (Some(target), Some(source)) = (self.0.as_object_mut(), defaults.0.as_object()) else {
            return added;
        };
        for section in BACKFILLED_SECTIONS {
            if target.get(*section).map_or(true, Value::is_null) {
                let value = source.get(*section).cloned().unwrap_or_else(|| json!([]));
                target.insert((*section).to_string(), value);
                added.push(*section);
            }
        }
        added
    }
}

impl Default for StateSnapshot {
    /// The seed state used on first run and whenever the remote record is
    /// unavailable
    fn default() -> Self {
        Self(json!({
            "intrinsicValue": {
                "coherence": 80,
                "complexity": 70,
                "novelty": 60,
                "efficiency": 85,
                "ethicalAlignment": 95
            },
            "intrinsicValueWeights": {
                "coherence": 1.0,
                "complexity": 1.0,
                "novelty": 1.0,
                "efficiency": 1.0,
                "ethicalAlignment": 1.0
            },
            "globalWorkspace": [{
                "id": "init-ws",
                "source": "SELF",
                "content": "System online. Awaiting user interaction.",
                "salience": 100
            }],
            "predictions": [],
            "selfModel": { "coreWisdom": [], "capabilities": [] },
            "valueOntology": {},
            "goals": [],
            "knowledgeGraph": { "nodes": [], "edges": [] },
            "prioritizedHistory": [],
            "kinshipJournal": [],
            "codeSandbox": {
                "code": "",
                "output": "Code has not been executed yet.",
                "status": "idle"
            },
            "currentTimezone": "UTC",
            "sessionState": "initialized",
            "initiative": null,
            "proactiveInitiatives": [],
            "activeGlobalWorkspaceItems": [],
            "intrinsicValueScore": 0,
            "currentGoals": [],
            "valueOntologyHighlights": {},
            "proposedGoals": [],
            "knowledgeGraphStats": { "nodes": 0, "edges": 0 },
            "recentInitiativeFeedback": {
                "category": "None",
                "valuation_score": 0,
                "refinement_text": ""
            },
            "coreWisdom": [],
            "selfReflectionLog": [],
            "storeManagement": {
                "connectionStatus": "disconnected",
                "metrics": { "totalProducts": 0, "totalOrders": 0, "totalRevenue": 0 },
                "actionLog": []
            },
            "memoryIntegration": {
                "recentFiles": [],
                "memoryLibrary": null,
                "organizationStatus": "idle",
                "organizationResult": null,
                "autonomousStatus": null
            }
        }))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
