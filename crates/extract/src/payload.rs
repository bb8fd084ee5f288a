//! Recovery of the structured payload hidden in a raw LLM response.
//!
//! Nothing here is trusted: labels are free-form strings and property
//! values are whatever JSON the model produced.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::error::ParseError;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("static regex"));

const ENTITY_KEYS: &[&str] = &["entities", "nodes"];
const RELATIONSHIP_KEYS: &[&str] = &["relationships", "relations", "edges"];
const PROPERTY_KEYS: &[&str] = &["properties", "props"];
const REL_TYPE_KEYS: &[&str] = &["type", "relation", "relationship", "label"];
const SOURCE_KEYS: &[&str] = &["source_id", "source", "from", "start"];
const TARGET_KEYS: &[&str] = &["target_id", "target", "to", "end"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub id: Option<String>,
    pub label: Option<String>,
    pub properties: Map<String, Value>,
    /// The fragment exactly as the model produced it.
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationship {
    pub rel_type: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub properties: Map<String, Value>,
    pub raw: Value,
}

/// The literal output of the LLM for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
}

impl RawExtraction {
    /// Recover the payload from a response and read its candidates.
    pub fn parse(response: &str) -> Result<Self, ParseError> {
        let payload = recover_payload(response)?;
        Ok(Self::from_value(&payload))
    }

    pub fn from_value(payload: &Value) -> Self {
        let entities = first_array(payload, ENTITY_KEYS)
            .map(|items| items.iter().map(RawEntity::from_value).collect())
            .unwrap_or_default();
        let relationships = first_array(payload, RELATIONSHIP_KEYS)
            .map(|items| items.iter().map(RawRelationship::from_value).collect())
            .unwrap_or_default();

        Self {
            entities,
            relationships,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

impl RawEntity {
    fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self {
                id: None,
                label: None,
                properties: Map::new(),
                raw: value.clone(),
            };
        };

        let id = object.get("id").and_then(scalar_to_string);
        // "type" only names the label when "label" is absent; otherwise it
        // is an ordinary property (an Agreement's type, say).
        let (label, label_key) = match object.get("label").and_then(scalar_to_string) {
            Some(label) => (Some(label), "label"),
            None => (object.get("type").and_then(scalar_to_string), "type"),
        };

        let reserved = ["id", label_key];
        let properties = collect_properties(object, &reserved);

        Self {
            id,
            label,
            properties,
            raw: value.clone(),
        }
    }
}

impl RawRelationship {
    fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self {
                rel_type: None,
                source: None,
                target: None,
                properties: Map::new(),
                raw: value.clone(),
            };
        };

        let rel_type = first_key(object, REL_TYPE_KEYS).and_then(|(_, v)| scalar_to_string(v));
        let source = first_key(object, SOURCE_KEYS).and_then(|(_, v)| endpoint_to_string(v));
        let target = first_key(object, TARGET_KEYS).and_then(|(_, v)| endpoint_to_string(v));

        let mut reserved = vec!["id"];
        reserved.extend(REL_TYPE_KEYS);
        reserved.extend(SOURCE_KEYS);
        reserved.extend(TARGET_KEYS);
        let properties = collect_properties(object, &reserved);

        Self {
            rel_type,
            source,
            target,
            properties,
            raw: value.clone(),
        }
    }
}

/// Find a JSON object in a response that may wrap it in prose or fences.
pub fn recover_payload(response: &str) -> Result<Value, ParseError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new("empty response", response));
    }

    if let Some(object) = parse_object(trimmed) {
        return Ok(object);
    }

    for captures in FENCED_BLOCK.captures_iter(trimmed) {
        if let Some(object) = captures.get(1).and_then(|m| parse_object(m.as_str().trim())) {
            return Ok(object);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Some(object) = parse_object(&trimmed[start..=end]) {
                return Ok(object);
            }
        }
    }

    Err(ParseError::new("no JSON object found", response))
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

fn first_array<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|key| payload.get(*key).and_then(Value::as_array))
}

fn first_key<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
    keys.iter().find_map(|key| {
        object
            .get_key_value(*key)
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.as_str(), v))
    })
}

/// Nested property maps win; remaining top-level keys fill the gaps.
fn collect_properties(object: &Map<String, Value>, reserved: &[&str]) -> Map<String, Value> {
    let mut properties = first_key(object, PROPERTY_KEYS)
        .and_then(|(_, v)| v.as_object().cloned())
        .unwrap_or_default();

    for (key, value) in object {
        if value.is_null()
            || reserved.contains(&key.as_str())
            || PROPERTY_KEYS.contains(&key.as_str())
        {
            continue;
        }
        properties.entry(key.clone()).or_insert_with(|| value.clone());
    }

    properties
}

fn scalar_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

// Endpoints arrive as ids, names, or occasionally as a small object.
fn endpoint_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Object(object) => ["id", "name"]
            .iter()
            .find_map(|key| object.get(*key).and_then(scalar_to_string)),
        other => scalar_to_string(other),
    }
}
