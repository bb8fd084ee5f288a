use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::SchemaError;

/// Identity property used when a node type does not declare one.
pub const DEFAULT_IDENTITY_PROPERTY: &str = "name";

/// Label the graph store gives its per-document nodes.
pub const DOCUMENT_LABEL: &str = "Document";

/// Node labels a schema may not declare.
pub const RESERVED_LABELS: &[&str] = &[DOCUMENT_LABEL];

/// Property names the graph store writes itself: the merge key and the
/// created marker.
pub const RESERVED_PROPERTIES: &[&str] = &["dedup_key", "__created"];

pub fn is_reserved_label(label: &str) -> bool {
    RESERVED_LABELS.iter().any(|r| r.eq_ignore_ascii_case(label))
}

pub fn is_reserved_property(name: &str) -> bool {
    RESERVED_PROPERTIES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Int,
    Float,
    Bool,
    Date,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Int => "int",
            PropertyType::Float => "float",
            PropertyType::Bool => "bool",
            PropertyType::Date => "date",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub required: bool,
}

impl PropertyDef {
    pub fn optional(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            required: false,
        }
    }

    pub fn required(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            required: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeType {
    pub label: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    /// LLM guidance only, never validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_property: Option<String>,
    /// Share node identity across documents instead of scoping it to one.
    #[serde(default)]
    pub global_identity: bool,
}

impl NodeType {
    pub fn new(label: impl Into<String>, properties: Vec<PropertyDef>) -> Self {
        Self {
            label: label.into(),
            properties,
            description: None,
            primary_property: None,
            global_identity: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_primary_property(mut self, property: impl Into<String>) -> Self {
        self.primary_property = Some(property.into());
        self
    }

    pub fn globally_identified(mut self) -> Self {
        self.global_identity = true;
        self
    }

    pub fn identity_property(&self) -> &str {
        self.primary_property
            .as_deref()
            .unwrap_or(DEFAULT_IDENTITY_PROPERTY)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipType {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub source_label: String,
    pub target_label: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RelationshipType {
    pub fn new(
        rel_type: impl Into<String>,
        source_label: impl Into<String>,
        target_label: impl Into<String>,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            source_label: source_label.into(),
            target_label: target_label.into(),
            properties: Vec::new(),
            description: None,
        }
    }

    pub fn with_properties(mut self, properties: Vec<PropertyDef>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Declared node and relationship vocabulary for one ingestion.
///
/// Passed explicitly into every pipeline stage; there is no ambient schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub node_types: Vec<NodeType>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipType>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_types: Vec::new(),
            relationship_types: Vec::new(),
        }
    }

    pub fn with_node(mut self, node_type: NodeType) -> Self {
        self.node_types.push(node_type);
        self
    }

    pub fn with_relationship(mut self, relationship_type: RelationshipType) -> Self {
        self.relationship_types.push(relationship_type);
        self
    }

    /// Parse and validate a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Schema = serde_json::from_str(json).context("Failed to parse schema JSON")?;
        schema.validate()?;
        Ok(schema)
    }

    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid schema file {}", path.display()))
    }

    /// Labels and relationship types are looked up case-insensitively, so
    /// uniqueness is checked the same way.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut labels = HashSet::new();
        let mut folded_labels = HashSet::new();
        for node in &self.node_types {
            check_identifier(&node.label)?;
            if is_reserved_label(&node.label) {
                return Err(SchemaError::ReservedName(node.label.clone()));
            }
            if !folded_labels.insert(node.label.to_lowercase()) {
                return Err(SchemaError::DuplicateLabel(node.label.clone()));
            }
            labels.insert(node.label.as_str());
            check_properties(&node.label, &node.properties)?;

            let identity = node.identity_property();
            if node.property(identity).is_none() {
                return Err(SchemaError::MissingIdentityProperty {
                    label: node.label.clone(),
                    property: identity.to_string(),
                });
            }
        }

        let mut rel_types = HashSet::new();
        for rel in &self.relationship_types {
            check_identifier(&rel.rel_type)?;
            if !rel_types.insert(rel.rel_type.to_lowercase()) {
                return Err(SchemaError::DuplicateRelationshipType(rel.rel_type.clone()));
            }
            for label in [&rel.source_label, &rel.target_label] {
                if !labels.contains(label.as_str()) {
                    return Err(SchemaError::UndeclaredEndpoint {
                        rel_type: rel.rel_type.clone(),
                        label: label.clone(),
                    });
                }
            }
            check_properties(&rel.rel_type, &rel.properties)?;
        }

        Ok(())
    }

    pub fn node_type(&self, label: &str) -> Option<&NodeType> {
        self.node_types.iter().find(|n| n.label == label)
    }

    /// Exact case-insensitive match of a free-form label.
    pub fn resolve_label(&self, raw: &str) -> Option<&NodeType> {
        let raw = raw.trim();
        self.node_types
            .iter()
            .find(|n| n.label.eq_ignore_ascii_case(raw))
    }

    pub fn relationship_type(&self, name: &str) -> Option<&RelationshipType> {
        self.relationship_types.iter().find(|r| r.rel_type == name)
    }

    /// Case-insensitive match that also treats spaces and hyphens as
    /// underscores ("works at" resolves to WORKS_AT).
    pub fn resolve_relationship_type(&self, raw: &str) -> Option<&RelationshipType> {
        let wanted: String = raw
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        self.relationship_types
            .iter()
            .find(|r| r.rel_type.eq_ignore_ascii_case(&wanted))
    }

    /// Schema description handed to the LLM alongside each chunk.
    pub fn guidance(&self) -> String {
        let mut lines = vec!["NODE TYPES:".to_string()];
        for node in &self.node_types {
            match &node.description {
                Some(description) => lines.push(format!("  {}: {}", node.label, description)),
                None => lines.push(format!("  {}", node.label)),
            }
            for prop in &node.properties {
                let required = if prop.required { " (required)" } else { "" };
                lines.push(format!("    - {}: {}{}", prop.name, prop.property_type, required));
            }
        }

        lines.push(String::new());
        lines.push("RELATIONSHIP TYPES:".to_string());
        for rel in &self.relationship_types {
            lines.push(format!(
                "  {} -[{}]-> {}",
                rel.source_label, rel.rel_type, rel.target_label
            ));
            for prop in &rel.properties {
                lines.push(format!("    - {}: {}", prop.name, prop.property_type));
            }
        }

        lines.join("\n")
    }
}

fn check_properties(owner: &str, properties: &[PropertyDef]) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for prop in properties {
        check_identifier(&prop.name)?;
        if is_reserved_property(&prop.name) {
            return Err(SchemaError::ReservedName(format!("{}.{}", owner, prop.name)));
        }
        if !seen.insert(prop.name.as_str()) {
            return Err(SchemaError::DuplicateProperty {
                owner: owner.to_string(),
                property: prop.name.clone(),
            });
        }
    }
    Ok(())
}

/// Names end up inside Cypher, so only plain identifiers are allowed.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn check_identifier(name: &str) -> Result<(), SchemaError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{building_code_schema, legal_document_schema};

    fn company_schema() -> Schema {
        Schema::new("test")
            .with_node(NodeType::new(
                "Person",
                vec![PropertyDef::required("name", PropertyType::String)],
            ))
            .with_node(NodeType::new(
                "Company",
                vec![PropertyDef::required("name", PropertyType::String)],
            ))
            .with_relationship(RelationshipType::new("WORKS_AT", "Person", "Company"))
    }

    #[test]
    fn test_valid_schema() {
        assert_eq!(company_schema().validate(), Ok(()));
        assert_eq!(legal_document_schema().validate(), Ok(()));
        assert_eq!(building_code_schema().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_undeclared_endpoint() {
        let schema = company_schema()
            .with_relationship(RelationshipType::new("OWNS", "Company", "Asset"));
        assert_eq!(
            schema.validate(),
            Err(SchemaError::UndeclaredEndpoint {
                rel_type: "OWNS".into(),
                label: "Asset".into()
            })
        );
    }

    #[test]
    fn test_rejects_duplicates() {
        let schema = company_schema().with_node(NodeType::new(
            "Person",
            vec![PropertyDef::required("name", PropertyType::String)],
        ));
        assert_eq!(schema.validate(), Err(SchemaError::DuplicateLabel("Person".into())));

        let schema =
            company_schema().with_relationship(RelationshipType::new("WORKS_AT", "Person", "Company"));
        assert_eq!(
            schema.validate(),
            Err(SchemaError::DuplicateRelationshipType("WORKS_AT".into()))
        );
    }

    #[test]
    fn test_duplicates_differing_only_in_case() {
        let schema = company_schema().with_node(NodeType::new(
            "PERSON",
            vec![PropertyDef::required("name", PropertyType::String)],
        ));
        assert_eq!(schema.validate(), Err(SchemaError::DuplicateLabel("PERSON".into())));

        let schema =
            company_schema().with_relationship(RelationshipType::new("works_at", "Person", "Company"));
        assert_eq!(
            schema.validate(),
            Err(SchemaError::DuplicateRelationshipType("works_at".into()))
        );
    }

    #[test]
    fn test_rejects_reserved_names() {
        let schema = company_schema().with_node(NodeType::new(
            "Document",
            vec![PropertyDef::required("name", PropertyType::String)],
        ));
        assert_eq!(schema.validate(), Err(SchemaError::ReservedName("Document".into())));

        let schema = Schema::new("s").with_node(NodeType::new(
            "Person",
            vec![
                PropertyDef::required("name", PropertyType::String),
                PropertyDef::optional("dedup_key", PropertyType::String),
            ],
        ));
        assert_eq!(
            schema.validate(),
            Err(SchemaError::ReservedName("Person.dedup_key".into()))
        );

        let schema = company_schema().with_relationship(
            RelationshipType::new("EMPLOYS", "Company", "Person")
                .with_properties(vec![PropertyDef::optional("__created", PropertyType::Bool)]),
        );
        assert_eq!(
            schema.validate(),
            Err(SchemaError::ReservedName("EMPLOYS.__created".into()))
        );
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        tokio::fs::write(&path, serde_json::to_string(&company_schema()).unwrap())
            .await
            .unwrap();
        assert_eq!(Schema::from_json_file(&path).await.unwrap(), company_schema());

        let missing = dir.path().join("missing.json");
        assert!(Schema::from_json_file(&missing).await.is_err());
    }

    #[test]
    fn test_identity_property_must_be_declared() {
        let schema = Schema::new("s").with_node(NodeType::new(
            "Clause",
            vec![PropertyDef::required("number", PropertyType::String)],
        ));
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::MissingIdentityProperty { .. })
        ));

        let node = NodeType::new(
            "Clause",
            vec![PropertyDef::required("number", PropertyType::String)],
        )
        .with_primary_property("number");
        assert_eq!(Schema::new("s").with_node(node).validate(), Ok(()));
    }

    #[test]
    fn test_rejects_non_identifier_names() {
        let schema = Schema::new("s").with_node(NodeType::new(
            "Bad Label",
            vec![PropertyDef::required("name", PropertyType::String)],
        ));
        assert_eq!(
            schema.validate(),
            Err(SchemaError::InvalidIdentifier("Bad Label".into()))
        );
    }

    #[test]
    fn test_label_resolution_is_case_insensitive() {
        let schema = company_schema();
        assert_eq!(schema.resolve_label(" person ").unwrap().label, "Person");
        assert!(schema.resolve_label("human").is_none());
        assert_eq!(
            schema.resolve_relationship_type("works at").unwrap().rel_type,
            "WORKS_AT"
        );
        assert_eq!(
            schema.resolve_relationship_type("Works-At").unwrap().rel_type,
            "WORKS_AT"
        );
    }

    #[test]
    fn test_guidance_lists_types() {
        let guidance = company_schema().guidance();
        assert!(guidance.contains("    - name: string (required)"));
        assert!(guidance.contains("  Person -[WORKS_AT]-> Company"));
    }

    #[test]
    fn test_json_roundtrip_with_defaults() {
        let json = r#"{
            "name": "mini",
            "node_types": [
                {"label": "Clause", "primary_property": "number",
                 "properties": [{"name": "number", "type": "string", "required": true},
                                {"name": "effective", "type": "date"}]}
            ]
        }"#;
        let schema = Schema::from_json(json).unwrap();
        let clause = schema.node_type("Clause").unwrap();
        assert_eq!(clause.identity_property(), "number");
        assert!(!clause.property("effective").unwrap().required);
        assert!(!clause.global_identity);
        assert!(schema.relationship_types.is_empty());
    }
}
