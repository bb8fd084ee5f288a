use crate::schema::Schema;

pub fn build_extraction_prompt(schema: &Schema, chunk_text: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify entities that match one of the node types below
2. Extract relationships between those entities using only the relationship types below
3. Output ONLY valid JSON, nothing else

{}

OUTPUT FORMAT:
{{
  "entities": [
    {{"id": "e1", "label": "NodeType", "properties": {{"property": "value"}}}}
  ],
  "relationships": [
    {{"source_id": "e1", "target_id": "e2", "type": "RELATIONSHIP_TYPE", "properties": {{}}}}
  ]
}}

RULES:
- Use sequential ids: e1, e2, e3, etc.
- Labels and relationship types must be copied exactly from the lists above
- Always fill in required properties; omit properties the text does not state
- Dates as YYYY-MM-DD
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        schema.guidance(),
        chunk_text
    )
}

pub fn build_retry_prompt(invalid_output: &str) -> String {
    format!(
        r#"The following output does not contain a valid JSON object:

{}

Fix it. Output only a valid JSON object with "entities" and "relationships" arrays, with no markdown formatting, no code blocks, no explanations."#,
        invalid_output
    )
}
