//! Built-in schemas for legal documents and building regulations.

use crate::schema::{NodeType, PropertyDef, PropertyType, RelationshipType, Schema};

/// Label of the catch-all node type in the presets.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Look a preset up by its short name: `legal` or `building_code`.
pub fn by_name(name: &str) -> Option<Schema> {
    match name.trim().to_lowercase().as_str() {
        "legal" => Some(legal_document_schema()),
        "building_code" | "obc" => Some(building_code_schema()),
        _ => None,
    }
}

/// Parties, agreements, clauses and the obligations and payments they set.
pub fn legal_document_schema() -> Schema {
    use PropertyType as T;

    Schema::new("Legal Document Schema")
        .with_node(
            NodeType::new(
                "Organization",
                vec![
                    PropertyDef::required("name", T::String),
                    PropertyDef::optional("role", T::String),
                    PropertyDef::optional("address", T::String),
                ],
            )
            .with_description("Company, agency or other party")
            .globally_identified(),
        )
        .with_node(
            NodeType::new(
                "Agreement",
                vec![
                    PropertyDef::required("title", T::String),
                    PropertyDef::optional("type", T::String),
                    PropertyDef::optional("effective_date", T::Date),
                    PropertyDef::optional("expiration_date", T::Date),
                ],
            )
            .with_primary_property("title")
            .with_description("Contract or agreement"),
        )
        .with_node(
            NodeType::new(
                "Clause",
                vec![
                    PropertyDef::required("number", T::String),
                    PropertyDef::optional("title", T::String),
                    PropertyDef::optional("text", T::String),
                    PropertyDef::optional("sequence", T::Int),
                ],
            )
            .with_primary_property("number")
            .with_description("Numbered clause or section (e.g. 3.2.2.45)"),
        )
        .with_node(
            NodeType::new(
                "Obligation",
                vec![
                    PropertyDef::required("description", T::String),
                    PropertyDef::optional("obligated_party", T::String),
                    PropertyDef::optional("due_date", T::Date),
                    PropertyDef::optional("mandatory", T::Bool),
                ],
            )
            .with_primary_property("description")
            .with_description("Duty or requirement"),
        )
        .with_node(
            NodeType::new(
                "Payment",
                vec![
                    PropertyDef::required("description", T::String),
                    PropertyDef::optional("amount", T::Float),
                    PropertyDef::optional("currency", T::String),
                    PropertyDef::optional("due_date", T::Date),
                ],
            )
            .with_primary_property("description")
            .with_description("Payment term"),
        )
        .with_node(
            NodeType::new(UNKNOWN_LABEL, vec![PropertyDef::required("name", T::String)])
                .with_description("Anything that fits no other type"),
        )
        .with_relationship(RelationshipType::new("PARTY_TO", "Organization", "Clause"))
        .with_relationship(RelationshipType::new(
            "PARTY_TO_AGREEMENT",
            "Organization",
            "Agreement",
        ))
        .with_relationship(
            RelationshipType::new("HAS_CLAUSE", "Agreement", "Clause")
                .with_properties(vec![PropertyDef::optional("sequence", T::Int)]),
        )
        .with_relationship(RelationshipType::new("SPECIFIES", "Clause", "Obligation"))
        .with_relationship(RelationshipType::new("REQUIRES_PAYMENT", "Clause", "Payment"))
        .with_relationship(RelationshipType::new("OBLIGATED_TO", "Organization", "Obligation"))
}

/// Ontario Building Code style regulation: the
/// Regulation > Division > Part > Section > Clause > SubClause > Item
/// hierarchy plus definitions, tables, cross-references and topics.
pub fn building_code_schema() -> Schema {
    use PropertyType as T;

    let sequenced = || vec![PropertyDef::optional("sequence", T::Int)];

    Schema::new("Building Code Schema")
        .with_node(
            NodeType::new(
                "Regulation",
                vec![
                    PropertyDef::required("regulation_id", T::String),
                    PropertyDef::required("title", T::String),
                    PropertyDef::optional("abbreviation", T::String),
                    PropertyDef::optional("last_amended", T::Date),
                    PropertyDef::optional("source_url", T::String),
                ],
            )
            .with_primary_property("regulation_id")
            .with_description("Root regulation, e.g. O. Reg. 332/12")
            .globally_identified(),
        )
        .with_node(
            NodeType::new(
                "Division",
                vec![
                    PropertyDef::required("division_id", T::String),
                    PropertyDef::required("title", T::String),
                    PropertyDef::optional("section_range", T::String),
                ],
            )
            .with_primary_property("division_id")
            .with_description("Division, e.g. Division A"),
        )
        .with_node(
            NodeType::new(
                "Part",
                vec![
                    PropertyDef::required("part_number", T::String),
                    PropertyDef::required("title", T::String),
                    PropertyDef::optional("sequence", T::Int),
                ],
            )
            .with_primary_property("part_number")
            .with_description("Part, e.g. Part 3 Fire Protection"),
        )
        .with_node(
            NodeType::new(
                "Section",
                vec![
                    PropertyDef::required("section_number", T::String),
                    PropertyDef::optional("title", T::String),
                    PropertyDef::optional("sequence", T::Int),
                ],
            )
            .with_primary_property("section_number")
            .with_description("Section, e.g. 3.2.2"),
        )
        .with_node(
            NodeType::new(
                "Clause",
                vec![
                    PropertyDef::required("clause_number", T::String),
                    PropertyDef::required("text", T::String),
                    PropertyDef::optional("sequence", T::Int),
                ],
            )
            .with_primary_property("clause_number")
            .with_description("Enforceable sentence, e.g. 3.2.2.45.(1)"),
        )
        .with_node(
            NodeType::new(
                "SubClause",
                vec![
                    PropertyDef::required("subclause_id", T::String),
                    PropertyDef::required("text", T::String),
                    PropertyDef::optional("sequence", T::Int),
                ],
            )
            .with_primary_property("subclause_id")
            .with_description("Lettered item inside a clause: (a), (b)"),
        )
        .with_node(
            NodeType::new(
                "Item",
                vec![
                    PropertyDef::required("item_id", T::String),
                    PropertyDef::required("text", T::String),
                    PropertyDef::optional("sequence", T::Int),
                ],
            )
            .with_primary_property("item_id")
            .with_description("Roman numeral item inside a sub-clause: (i), (ii)"),
        )
        .with_node(
            NodeType::new(
                "Definition",
                vec![
                    PropertyDef::required("term", T::String),
                    PropertyDef::required("definition", T::String),
                    PropertyDef::optional("source_section", T::String),
                ],
            )
            .with_primary_property("term")
            .with_description("Defined term used in the code"),
        )
        .with_node(
            NodeType::new(
                "Table",
                vec![
                    PropertyDef::required("table_number", T::String),
                    PropertyDef::optional("title", T::String),
                    PropertyDef::required("raw_text", T::String),
                    PropertyDef::optional("section_reference", T::String),
                ],
            )
            .with_primary_property("table_number")
            .with_description("Table, flattened to text"),
        )
        .with_node(
            NodeType::new(
                "Reference",
                vec![
                    PropertyDef::required("target", T::String),
                    PropertyDef::required("text", T::String),
                    PropertyDef::optional("type", T::String),
                ],
            )
            .with_primary_property("target")
            .with_description("Internal or external cross-reference"),
        )
        .with_node(
            NodeType::new(
                "Topic",
                vec![
                    PropertyDef::required("name", T::String),
                    PropertyDef::optional("description", T::String),
                ],
            )
            .with_description("Subject tag such as Fire Safety")
            .globally_identified(),
        )
        .with_relationship(
            RelationshipType::new("HAS_DIVISION", "Regulation", "Division").with_properties(sequenced()),
        )
        .with_relationship(
            RelationshipType::new("HAS_PART", "Division", "Part").with_properties(sequenced()),
        )
        .with_relationship(
            RelationshipType::new("HAS_SECTION", "Part", "Section").with_properties(sequenced()),
        )
        .with_relationship(
            RelationshipType::new("HAS_CLAUSE", "Section", "Clause").with_properties(sequenced()),
        )
        .with_relationship(
            RelationshipType::new("HAS_SUBCLAUSE", "Clause", "SubClause")
                .with_properties(sequenced()),
        )
        .with_relationship(
            RelationshipType::new("HAS_ITEM", "SubClause", "Item").with_properties(sequenced()),
        )
        .with_relationship(RelationshipType::new("DEFINED_IN", "Definition", "Section"))
        .with_relationship(RelationshipType::new("USES_TERM", "Clause", "Definition"))
        .with_relationship(
            RelationshipType::new("HAS_TABLE", "Section", "Table").with_properties(sequenced()),
        )
        .with_relationship(RelationshipType::new("REFERENCED_BY_CLAUSE", "Table", "Clause"))
        .with_relationship(RelationshipType::new("CITES", "Clause", "Clause"))
        .with_relationship(RelationshipType::new("SUBCLAUSE_CITES", "SubClause", "Clause"))
        .with_relationship(RelationshipType::new("CONTAINS_REFERENCE", "Clause", "Reference"))
        .with_relationship(RelationshipType::new("BELONGS_TO_TOPIC", "Clause", "Topic"))
        .with_relationship(RelationshipType::new("SECTION_BELONGS_TO_TOPIC", "Section", "Topic"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Normalizer;
    use crate::payload::RawExtraction;
    use serde_json::json;

    #[test]
    fn test_building_code_hierarchy_resolves() {
        let schema = building_code_schema();
        assert_eq!(schema.validate(), Ok(()));

        let chain = ["Regulation", "Division", "Part", "Section", "Clause", "SubClause", "Item"];
        for pair in chain.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            assert!(
                schema.relationship_types.iter().any(|r| r.source_label == parent
                    && r.target_label == child
                    && r.property("sequence").is_some()),
                "{} -> {} is not declared",
                parent,
                child
            );
        }
        assert_eq!(schema.resolve_label("subclause").unwrap().label, "SubClause");
        assert_eq!(
            schema.resolve_relationship_type("has subclause").unwrap().rel_type,
            "HAS_SUBCLAUSE"
        );
    }

    #[test]
    fn test_building_code_extraction_normalizes() {
        let raw = RawExtraction::from_value(&json!({
            "entities": [
                {"id": "s", "label": "Section", "section_number": "3.2.2", "title": "Building Size"},
                {"id": "c", "label": "clause", "clause_number": "3.2.2.45.(1)",
                 "text": "A building is permitted to be constructed...", "sequence": "1"}
            ],
            "relationships": [{"source": "s", "target": "c", "type": "has clause", "sequence": 1}]
        }));
        let out = Normalizer::default().normalize(&building_code_schema(), "c0", 0, &raw);

        assert!(out.rejections.is_empty());
        assert_eq!(out.entities[1].dedup_key, "clause:3.2.2.45.(1)");
        assert_eq!(out.relationships[0].rel_type, "HAS_CLAUSE");
        assert_eq!(out.relationships[0].source_key, "section:3.2.2");
    }

    #[test]
    fn test_presets_by_name() {
        assert_eq!(by_name("legal"), Some(legal_document_schema()));
        assert_eq!(by_name(" OBC "), Some(building_code_schema()));
        assert!(by_name("medical").is_none());
    }
}
