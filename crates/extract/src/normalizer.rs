use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::canonical::{
    CanonicalEntity, CanonicalExtraction, CanonicalRelationship, Properties, Rejection,
    RejectionKind, Subject,
};
use crate::error::{ParseError, SchemaError};
use crate::payload::{RawEntity, RawExtraction, RawRelationship};
use crate::schema::{NodeType, PropertyDef, Schema, is_identifier, is_reserved_property};
use crate::value::{PropertyValue, coerce};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Node label used for entities whose label matches nothing declared.
    /// Without one such entities are rejected.
    #[serde(default)]
    pub fallback_label: Option<String>,
    /// Keep undeclared scalar properties as strings instead of dropping them.
    #[serde(default)]
    pub keep_undeclared: bool,
}

impl NormalizerConfig {
    pub fn with_fallback_label(mut self, label: impl Into<String>) -> Self {
        self.fallback_label = Some(label.into());
        self
    }

    pub fn validate(&self, schema: &Schema) -> Result<(), SchemaError> {
        match &self.fallback_label {
            Some(label) if schema.node_type(label).is_none() => {
                Err(SchemaError::UnknownFallbackLabel(label.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_identity(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn dedup_key(label: &str, identity: &str) -> String {
    format!("{}:{}", label.to_lowercase(), normalize_identity(identity))
}

/// Turns untrusted per-chunk LLM output into a schema-conformant record.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

struct Accepted {
    entity: CanonicalEntity,
    identity: String,
}

enum Endpoint<'a> {
    Local(&'a CanonicalEntity),
    Deferred(String),
}

/// Hands out `<Label>_<n>` ids that never repeat an id the LLM supplied.
struct LocalIds<'r> {
    taken: HashSet<&'r str>,
    generated: HashSet<String>,
    counters: HashMap<String, usize>,
}

impl<'r> LocalIds<'r> {
    fn new(raw: &'r RawExtraction) -> Self {
        Self {
            taken: raw.entities.iter().filter_map(|e| e.id.as_deref()).collect(),
            generated: HashSet::new(),
            counters: HashMap::new(),
        }
    }

    fn next(&mut self, label: &str) -> String {
        let counter = self.counters.entry(label.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let id = format!("{}_{}", label, counter);
            if !self.taken.contains(id.as_str()) && self.generated.insert(id.clone()) {
                return id;
            }
        }
    }
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Recover the payload from a raw response, then normalize it.
    pub fn normalize_response(
        &self,
        schema: &Schema,
        chunk_id: &str,
        sequence_index: usize,
        response: &str,
    ) -> Result<CanonicalExtraction, ParseError> {
        let raw = RawExtraction::parse(response)?;
        Ok(self.normalize(schema, chunk_id, sequence_index, &raw))
    }

    pub fn normalize(
        &self,
        schema: &Schema,
        chunk_id: &str,
        sequence_index: usize,
        raw: &RawExtraction,
    ) -> CanonicalExtraction {
        let mut out = CanonicalExtraction::empty(chunk_id, sequence_index);

        let mut accepted: Vec<Accepted> = Vec::new();
        let mut rejected_ids = HashSet::new();
        let mut local_ids = LocalIds::new(raw);
        for candidate in &raw.entities {
            match self.normalize_entity(schema, chunk_id, candidate, &mut local_ids, &mut out.rejections) {
                Some(entity) => accepted.push(entity),
                None => {
                    if let Some(id) = &candidate.id {
                        rejected_ids.insert(id.as_str());
                    }
                }
            }
        }

        let mut by_id: HashMap<&str, usize> = HashMap::new();
        for (index, a) in accepted.iter().enumerate() {
            by_id.entry(a.entity.local_id.as_str()).or_insert(index);
        }

        for candidate in &raw.relationships {
            if let Some(rel) = self.normalize_relationship(
                schema,
                chunk_id,
                candidate,
                &accepted,
                &by_id,
                &rejected_ids,
                &mut out.rejections,
            ) {
                out.relationships.push(rel);
            }
        }

        out.entities = accepted.into_iter().map(|a| a.entity).collect();

        if !out.rejections.is_empty() {
            debug!(
                chunk_id,
                entities = out.entities.len(),
                relationships = out.relationships.len(),
                rejections = out.rejections.len(),
                "Normalized chunk with rejections"
            );
        }
        out
    }

    fn normalize_entity(
        &self,
        schema: &Schema,
        chunk_id: &str,
        candidate: &RawEntity,
        local_ids: &mut LocalIds<'_>,
        rejections: &mut Vec<Rejection>,
    ) -> Option<Accepted> {
        let reject = |kind, reason: String| {
            Rejection::new(Subject::Entity, kind, reason, candidate.raw.clone(), chunk_id)
        };

        let Some(raw_label) = candidate.label.as_deref() else {
            rejections.push(reject(RejectionKind::UnresolvedLabel, "entity has no label".into()));
            return None;
        };

        let node_type = match self.resolve_node_type(schema, raw_label) {
            Some(node_type) => node_type,
            None => {
                rejections.push(reject(
                    RejectionKind::UnresolvedLabel,
                    format!("label {:?} is not declared", raw_label),
                ));
                return None;
            }
        };

        let properties = self.coerce_properties(
            &node_type.label,
            &node_type.properties,
            &candidate.properties,
            chunk_id,
            rejections,
        );

        let missing: Vec<&str> = node_type
            .properties
            .iter()
            .filter(|p| p.required && !properties.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            rejections.push(reject(
                RejectionKind::MissingRequiredProperty,
                format!(
                    "{} is missing required properties: {}",
                    node_type.label,
                    missing.join(", ")
                ),
            ));
            return None;
        }

        let identity_property = node_type.identity_property();
        let identity = match properties.get(identity_property) {
            Some(value) => normalize_identity(&value.to_string()),
            None => String::new(),
        };
        if identity.is_empty() {
            rejections.push(reject(
                RejectionKind::MissingIdentity,
                format!(
                    "{} has no value for identity property {}",
                    node_type.label, identity_property
                ),
            ));
            return None;
        }

        let local_id = match &candidate.id {
            Some(id) => id.clone(),
            None => local_ids.next(&node_type.label),
        };

        Some(Accepted {
            entity: CanonicalEntity {
                local_id,
                dedup_key: dedup_key(&node_type.label, &identity),
                label: node_type.label.clone(),
                properties,
                chunk_id: chunk_id.to_string(),
            },
            identity,
        })
    }

    fn resolve_node_type<'s>(&self, schema: &'s Schema, raw_label: &str) -> Option<&'s NodeType> {
        schema.resolve_label(raw_label).or_else(|| {
            let fallback = self.config.fallback_label.as_deref()?;
            debug!(raw_label, fallback, "Label resolved to fallback");
            schema.node_type(fallback)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn normalize_relationship(
        &self,
        schema: &Schema,
        chunk_id: &str,
        candidate: &RawRelationship,
        accepted: &[Accepted],
        by_id: &HashMap<&str, usize>,
        rejected_ids: &HashSet<&str>,
        rejections: &mut Vec<Rejection>,
    ) -> Option<CanonicalRelationship> {
        let reject = |kind, reason: String| {
            Rejection::new(Subject::Relationship, kind, reason, candidate.raw.clone(), chunk_id)
        };

        let Some(raw_type) = candidate.rel_type.as_deref() else {
            rejections.push(reject(
                RejectionKind::UnknownRelationshipType,
                "relationship has no type".into(),
            ));
            return None;
        };
        let Some(rel_type) = schema.resolve_relationship_type(raw_type) else {
            rejections.push(reject(
                RejectionKind::UnknownRelationshipType,
                format!("relationship type {:?} is not declared", raw_type),
            ));
            return None;
        };

        let (Some(source), Some(target)) = (candidate.source.as_deref(), candidate.target.as_deref())
        else {
            rejections.push(reject(
                RejectionKind::UnresolvedEndpoint,
                format!("{} is missing an endpoint", rel_type.rel_type),
            ));
            return None;
        };

        let mut keys = Vec::with_capacity(2);
        for (reference, declared) in [
            (source, rel_type.source_label.as_str()),
            (target, rel_type.target_label.as_str()),
        ] {
            match resolve_endpoint(reference, declared, accepted, by_id, rejected_ids) {
                Ok(Endpoint::Local(entity)) if entity.label != declared => {
                    rejections.push(reject(
                        RejectionKind::SchemaViolation,
                        format!(
                            "{} expects {} but {:?} is a {}",
                            rel_type.rel_type, declared, reference, entity.label
                        ),
                    ));
                    return None;
                }
                Ok(Endpoint::Local(entity)) => keys.push(entity.dedup_key.clone()),
                Ok(Endpoint::Deferred(key)) => keys.push(key),
                Err(reason) => {
                    rejections.push(reject(RejectionKind::UnresolvedEndpoint, reason));
                    return None;
                }
            }
        }
        let target_key = keys.pop()?;
        let source_key = keys.pop()?;

        let properties = self.coerce_properties(
            &rel_type.rel_type,
            &rel_type.properties,
            &candidate.properties,
            chunk_id,
            rejections,
        );
        if let Some(missing) = rel_type
            .properties
            .iter()
            .find(|p| p.required && !properties.contains_key(&p.name))
        {
            rejections.push(reject(
                RejectionKind::MissingRequiredProperty,
                format!("{} is missing required property {}", rel_type.rel_type, missing.name),
            ));
            return None;
        }

        Some(CanonicalRelationship {
            rel_type: rel_type.rel_type.clone(),
            source_key,
            target_key,
            source_label: rel_type.source_label.clone(),
            target_label: rel_type.target_label.clone(),
            properties,
            chunk_id: chunk_id.to_string(),
            raw: candidate.raw.clone(),
        })
    }

    fn coerce_properties(
        &self,
        owner: &str,
        declared: &[PropertyDef],
        raw: &Map<String, Value>,
        chunk_id: &str,
        rejections: &mut Vec<Rejection>,
    ) -> Properties {
        let mut properties = Properties::new();
        for (key, value) in raw {
            let fragment = json!({ key.as_str(): value });
            let name = key.trim();

            let Some(def) = declared.iter().find(|p| p.name.eq_ignore_ascii_case(name)) else {
                match self.undeclared_value(name, value) {
                    Some(kept) => {
                        properties.entry(name.to_string()).or_insert(kept);
                    }
                    None => rejections.push(Rejection::new(
                        Subject::Property,
                        RejectionKind::UndeclaredProperty,
                        format!("{} declares no property {:?}", owner, name),
                        fragment,
                        chunk_id,
                    )),
                }
                continue;
            };

            match coerce(value, def.property_type) {
                Ok(Some(coerced)) => {
                    properties.entry(def.name.clone()).or_insert(coerced);
                }
                Ok(None) => {}
                Err(err) => rejections.push(Rejection::new(
                    Subject::Property,
                    RejectionKind::PropertyCoercion,
                    format!("{}.{}: {}", owner, def.name, err),
                    fragment,
                    chunk_id,
                )),
            }
        }
        properties
    }

    fn undeclared_value(&self, name: &str, value: &Value) -> Option<PropertyValue> {
        if !self.config.keep_undeclared || !is_identifier(name) || is_reserved_property(name) {
            return None;
        }
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(PropertyValue::String(s.trim().into())),
            Value::Number(n) => Some(PropertyValue::String(n.to_string())),
            Value::Bool(b) => Some(PropertyValue::String(b.to_string())),
            _ => None,
        }
    }
}

/// Id form first, then name form; both land on the same dedup key. A name
/// only matches entities of the declared label. Anything else is deferred to
/// the graph builder under the declared label.
fn resolve_endpoint<'a>(
    reference: &str,
    declared_label: &str,
    accepted: &'a [Accepted],
    by_id: &HashMap<&str, usize>,
    rejected_ids: &HashSet<&str>,
) -> Result<Endpoint<'a>, String> {
    if let Some(&index) = by_id.get(reference) {
        return Ok(Endpoint::Local(&accepted[index].entity));
    }

    let wanted = normalize_identity(reference);
    if wanted.is_empty() {
        return Err(format!("endpoint {:?} is empty", reference));
    }
    if let Some(found) = accepted
        .iter()
        .find(|a| a.identity == wanted && a.entity.label == declared_label)
    {
        return Ok(Endpoint::Local(&found.entity));
    }

    if rejected_ids.contains(reference) {
        return Err(format!("endpoint {:?} refers to a rejected entity", reference));
    }
    Ok(Endpoint::Deferred(dedup_key(declared_label, reference)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{UNKNOWN_LABEL, legal_document_schema};
    use crate::schema::{NodeType, PropertyType, RelationshipType};

    fn company_schema() -> Schema {
        Schema::new("test")
            .with_node(NodeType::new(
                "Person",
                vec![
                    PropertyDef::required("name", PropertyType::String),
                    PropertyDef::optional("age", PropertyType::Int),
                ],
            ))
            .with_node(NodeType::new(
                "Company",
                vec![
                    PropertyDef::required("name", PropertyType::String),
                    PropertyDef::optional("founded", PropertyType::Date),
                ],
            ))
            .with_relationship(
                RelationshipType::new("WORKS_AT", "Person", "Company")
                    .with_properties(vec![PropertyDef::optional("since", PropertyType::Int)]),
            )
    }

    fn raw(value: Value) -> RawExtraction {
        RawExtraction::from_value(&value)
    }

    fn kinds(out: &CanonicalExtraction) -> Vec<RejectionKind> {
        out.rejections.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_identity_normalization() {
        assert_eq!(normalize_identity("  Acme   Corp\t"), "acme corp");
        assert_eq!(dedup_key("Company", " ACME  corp "), "company:acme corp");
    }

    #[test]
    fn test_dangling_reference_is_deferred() {
        let input = raw(json!({
            "entities": [{"id": "e1", "label": "person", "props": {"name": "John"}}],
            "relations": [{"from": "e1", "to": "e2", "type": "WORKS_AT"}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);

        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities[0].label, "Person");
        assert_eq!(out.entities[0].dedup_key, "person:john");
        assert_eq!(out.relationships.len(), 1);
        assert_eq!(out.relationships[0].source_key, "person:john");
        assert_eq!(out.relationships[0].target_key, "company:e2");
        assert!(out.rejections.is_empty());
    }

    #[test]
    fn test_id_and_name_forms_resolve_identically() {
        let by_id = raw(json!({
            "entities": [
                {"id": "e1", "label": "Person", "name": "John Smith"},
                {"id": "e2", "label": "Company", "name": "Acme Corp"}
            ],
            "relationships": [{"source": "e1", "target": "e2", "type": "WORKS_AT"}]
        }));
        let by_name = raw(json!({
            "entities": [
                {"id": "e1", "label": "Person", "name": "John Smith"},
                {"id": "e2", "label": "Company", "name": "Acme Corp"}
            ],
            "relationships": [{"source": "john  smith", "target": "ACME CORP", "type": "works at"}]
        }));

        let normalizer = Normalizer::default();
        let schema = company_schema();
        let a = normalizer.normalize(&schema, "c0", 0, &by_id);
        let b = normalizer.normalize(&schema, "c0", 0, &by_name);

        assert_eq!(a.relationships[0].source_key, b.relationships[0].source_key);
        assert_eq!(a.relationships[0].target_key, b.relationships[0].target_key);
        assert_eq!(b.relationships[0].rel_type, "WORKS_AT");
        assert_eq!(b.relationships[0].target_key, "company:acme corp");
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let input = raw(json!({
            "entities": [
                {"id": "e1", "label": "Person", "name": "Ann", "age": "41", "shoe": 9},
                {"label": "Robot", "name": "R2"},
                {"id": "e3", "label": "Company", "name": "Acme", "founded": "sometime"}
            ],
            "relationships": [
                {"source": "e1", "target": "e3", "type": "WORKS_AT", "since": "2019"},
                {"source": "e1", "target": "e3", "type": "OWNS"}
            ]
        }));
        let normalizer = Normalizer::default();
        let schema = company_schema();
        let first = normalizer.normalize(&schema, "c0", 3, &input);
        let second = normalizer.normalize(&schema, "c0", 3, &input);
        assert_eq!(first, second);
        assert_eq!(first.sequence_index, 3);
    }

    #[test]
    fn test_coercion_failure_drops_property_only() {
        let input = raw(json!({
            "entities": [{"id": "e1", "label": "Company", "name": "Acme", "founded": "sometime"}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);

        assert_eq!(out.entities.len(), 1);
        assert!(!out.entities[0].properties.contains_key("founded"));
        assert_eq!(kinds(&out), vec![RejectionKind::PropertyCoercion]);
        assert_eq!(out.rejections[0].subject, Subject::Property);
        assert_eq!(out.rejections[0].raw, json!({"founded": "sometime"}));
        assert_eq!(out.rejections[0].chunk_id, "c0");
    }

    #[test]
    fn test_coerces_declared_types() {
        let input = raw(json!({
            "entities": [{"id": "e1", "label": "Person", "properties": {"name": "Ann", "AGE": "41"}}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);
        assert_eq!(out.entities[0].properties["age"], PropertyValue::Int(41));
    }

    #[test]
    fn test_missing_required_and_unresolved_label() {
        let input = raw(json!({
            "entities": [
                {"id": "e1", "label": "Person", "age": 3},
                {"id": "e2", "label": "Robot", "name": "R2"},
                {"id": "e3", "name": "nobody"}
            ]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);
        assert!(out.entities.is_empty());
        assert_eq!(
            kinds(&out),
            vec![
                RejectionKind::MissingRequiredProperty,
                RejectionKind::UnresolvedLabel,
                RejectionKind::UnresolvedLabel
            ]
        );
        assert_eq!(out.rejections[1].raw["name"], "R2");
    }

    #[test]
    fn test_fallback_label() {
        let schema = legal_document_schema();
        let config = NormalizerConfig::default().with_fallback_label(UNKNOWN_LABEL);
        assert_eq!(config.validate(&schema), Ok(()));

        let input = raw(json!({"entities": [{"id": "p", "label": "Person", "name": "Jane"}]}));
        let out = Normalizer::new(config).normalize(&schema, "c0", 0, &input);
        assert_eq!(out.entities[0].label, UNKNOWN_LABEL);
        assert_eq!(out.entities[0].dedup_key, "unknown:jane");

        let bad = NormalizerConfig::default().with_fallback_label("Misc");
        assert_eq!(
            bad.validate(&schema),
            Err(SchemaError::UnknownFallbackLabel("Misc".into()))
        );
    }

    #[test]
    fn test_primary_property_drives_dedup_key() {
        let input = raw(json!({
            "entities": [{"id": "c1", "label": "Clause", "number": " 3.2.1 ", "title": "Fees"}]
        }));
        let out = Normalizer::default().normalize(&legal_document_schema(), "c0", 0, &input);
        assert_eq!(out.entities[0].dedup_key, "clause:3.2.1");
    }

    #[test]
    fn test_undeclared_properties() {
        let input = raw(json!({
            "entities": [{"id": "e1", "label": "Person", "name": "Ann", "nickname": "A", "bad key": 1}]
        }));
        let schema = company_schema();

        let dropped = Normalizer::default().normalize(&schema, "c0", 0, &input);
        assert_eq!(dropped.rejections_of(Subject::Property).count(), 2);
        assert!(!dropped.entities[0].properties.contains_key("nickname"));

        let keep = NormalizerConfig {
            keep_undeclared: true,
            ..Default::default()
        };
        let kept = Normalizer::new(keep).normalize(&schema, "c0", 0, &input);
        assert_eq!(
            kept.entities[0].properties["nickname"],
            PropertyValue::String("A".into())
        );
        assert_eq!(kinds(&kept), vec![RejectionKind::UndeclaredProperty]);
    }

    #[test]
    fn test_store_owned_properties_are_never_kept() {
        let input = raw(json!({
            "entities": [{"id": "e1", "label": "Person", "name": "Ann",
                          "dedup_key": "x", "__created": true}]
        }));
        let keep = NormalizerConfig {
            keep_undeclared: true,
            ..Default::default()
        };
        let out = Normalizer::new(keep).normalize(&company_schema(), "c0", 0, &input);

        let properties = &out.entities[0].properties;
        assert!(!properties.contains_key("dedup_key"));
        assert!(!properties.contains_key("__created"));
        assert_eq!(out.entities[0].dedup_key, "person:ann");
        assert_eq!(
            kinds(&out),
            vec![RejectionKind::UndeclaredProperty, RejectionKind::UndeclaredProperty]
        );
    }

    #[test]
    fn test_endpoint_label_mismatch_is_schema_violation() {
        let input = raw(json!({
            "entities": [
                {"id": "e1", "label": "Company", "name": "Acme"},
                {"id": "e2", "label": "Company", "name": "Globex"}
            ],
            "relationships": [{"source": "e1", "target": "e2", "type": "WORKS_AT"}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);
        assert!(out.relationships.is_empty());
        assert_eq!(kinds(&out), vec![RejectionKind::SchemaViolation]);
        assert_eq!(out.rejections[0].subject, Subject::Relationship);
    }

    #[test]
    fn test_name_match_prefers_declared_label() {
        let input = raw(json!({
            "entities": [
                {"id": "e1", "label": "Company", "name": "Jordan"},
                {"id": "e2", "label": "Person", "name": "Jordan"},
                {"id": "e3", "label": "Company", "name": "Acme"}
            ],
            "relationships": [{"source": "Jordan", "target": "e3", "type": "WORKS_AT"}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);
        assert_eq!(out.relationships[0].source_key, "person:jordan");
    }

    #[test]
    fn test_name_matching_only_another_label_is_deferred() {
        let input = raw(json!({
            "entities": [
                {"id": "e1", "label": "Company", "name": "Jordan"},
                {"id": "e2", "label": "Company", "name": "Acme"}
            ],
            "relationships": [{"source": "Jordan", "target": "e2", "type": "WORKS_AT"}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);

        assert!(out.rejections.is_empty());
        assert_eq!(out.relationships[0].source_key, "person:jordan");
        assert_eq!(out.relationships[0].target_key, "company:acme");
    }

    #[test]
    fn test_relationship_rejections() {
        let input = raw(json!({
            "entities": [
                {"id": "e1", "label": "Person", "name": "Ann"},
                {"id": "e2", "label": "Person"}
            ],
            "relationships": [
                {"source": "e1", "target": "e2", "type": "WORKS_AT"},
                {"source": "e1", "target": "x", "type": "LIKES"},
                {"source": "e1", "type": "WORKS_AT"},
                {"source": "e1", "target": "x"}
            ]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);
        assert!(out.relationships.is_empty());
        assert_eq!(
            kinds(&out),
            vec![
                RejectionKind::MissingRequiredProperty,
                RejectionKind::UnresolvedEndpoint,
                RejectionKind::UnknownRelationshipType,
                RejectionKind::UnresolvedEndpoint,
                RejectionKind::UnknownRelationshipType
            ]
        );
    }

    #[test]
    fn test_generated_local_ids() {
        let input = raw(json!({
            "entities": [{"label": "Person", "name": "Ann"}, {"label": "Person", "name": "Bob"}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);
        assert_eq!(out.entities[0].local_id, "Person_1");
        assert_eq!(out.entities[1].local_id, "Person_2");
    }

    #[test]
    fn test_generated_ids_skip_supplied_ids() {
        let input = raw(json!({
            "entities": [
                {"label": "Person", "name": "Ann"},
                {"id": "Person_1", "label": "Person", "name": "Bob"},
                {"id": "c", "label": "Company", "name": "Acme"}
            ],
            "relationships": [{"source": "Person_1", "target": "c", "type": "WORKS_AT"}]
        }));
        let out = Normalizer::default().normalize(&company_schema(), "c0", 0, &input);

        let ids: Vec<&str> = out.entities.iter().map(|e| e.local_id.as_str()).collect();
        assert_eq!(ids, vec!["Person_2", "Person_1", "c"]);
        assert_eq!(out.relationships[0].source_key, "person:bob");
        assert_eq!(out.relationships[0].target_key, "company:acme");
    }

    #[test]
    fn test_normalize_response_surfaces_parse_errors() {
        let normalizer = Normalizer::default();
        let schema = company_schema();
        assert!(normalizer.normalize_response(&schema, "c0", 0, "no payload here").is_err());

        let fenced = "```json\n{\"entities\": [{\"id\": \"e1\", \"label\": \"Person\", \"name\": \"Ann\"}]}\n```";
        let out = normalizer.normalize_response(&schema, "c0", 0, fenced).unwrap();
        assert_eq!(out.entities.len(), 1);
    }
}
