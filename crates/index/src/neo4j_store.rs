use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{Graph, Query};
use std::collections::BTreeMap;
use tracing::info;

use extract::{DOCUMENT_LABEL, Properties, PropertyValue, Schema};

use crate::store::{
    GraphStats, GraphStore, NodeRef, RelRef, StoreWriteError, UpsertOutcome, Upserted,
};

const CONTAINS_ENTITY: &str = "CONTAINS_ENTITY";

/// Neo4j-backed graph store. Nodes are keyed by `dedup_key` per label.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;
        Ok(Self::new(graph))
    }

    /// One uniqueness constraint on `dedup_key` per declared label.
    pub async fn init_schema(&self, schema: &Schema) -> Result<()> {
        info!(labels = schema.node_types.len(), "Creating Neo4j constraints");

        let document = Query::new(format!(
            "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:{}) REQUIRE d.id IS UNIQUE",
            DOCUMENT_LABEL
        ));
        self.graph
            .run(document)
            .await
            .context("Failed to create Document constraint")?;

        for node_type in &schema.node_types {
            let query = Query::new(format!(
                "CREATE CONSTRAINT {}_dedup_key IF NOT EXISTS FOR (n:`{}`) REQUIRE n.dedup_key IS UNIQUE",
                node_type.label.to_lowercase(),
                node_type.label
            ));
            self.graph
                .run(query)
                .await
                .with_context(|| format!("Failed to create constraint for {}", node_type.label))?;
        }

        info!("Neo4j constraints created");
        Ok(())
    }

    async fn fetch_created(&self, query: Query) -> Result<Option<bool>, StoreWriteError> {
        let mut rows = self.graph.execute(query).await.map_err(write_error)?;
        let row = rows.next().await.map_err(write_error)?;
        Ok(row.map(|row| row.get::<bool>("created").unwrap_or(false)))
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let mut result = self.graph.execute(Query::new(cypher.to_string())).await?;
        let count = match result.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };
        Ok(count)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn upsert_node(
        &self,
        label: &str,
        key: &str,
        properties: &Properties,
    ) -> Result<Upserted<NodeRef>, StoreWriteError> {
        let cypher = format!(
            "MERGE (n:`{}` {{dedup_key: $key}})
             ON CREATE SET n.__created = true
             WITH n, coalesce(n.__created, false) AS created
             REMOVE n.__created
             {}
             RETURN created",
            label,
            set_clause("n", properties)
        );
        let query = bind_properties(Query::new(cypher).param("key", key), properties);

        let created = self.fetch_created(query).await?.unwrap_or(false);
        Ok(Upserted {
            reference: NodeRef::new(label, key),
            outcome: outcome(created),
        })
    }

    async fn upsert_relationship(
        &self,
        rel_type: &str,
        source: &NodeRef,
        target: &NodeRef,
        properties: &Properties,
    ) -> Result<Upserted<RelRef>, StoreWriteError> {
        let cypher = format!(
            "MATCH (s:`{}` {{dedup_key: $source}})
             MATCH (t:`{}` {{dedup_key: $target}})
             MERGE (s)-[r:`{}`]->(t)
             ON CREATE SET r.__created = true
             WITH r, coalesce(r.__created, false) AS created
             REMOVE r.__created
             {}
             RETURN created",
            source.label,
            target.label,
            rel_type,
            set_clause("r", properties)
        );
        let query = Query::new(cypher)
            .param("source", source.key.as_str())
            .param("target", target.key.as_str());
        let query = bind_properties(query, properties);

        // No row back means one of the MATCHes found nothing.
        let Some(created) = self.fetch_created(query).await? else {
            return Err(StoreWriteError::MissingEndpoint {
                label: source.label.clone(),
                key: format!("{} or {} {}", source.key, target.label, target.key),
            });
        };

        Ok(Upserted {
            reference: RelRef {
                rel_type: rel_type.to_string(),
                source: source.clone(),
                target: target.clone(),
            },
            outcome: outcome(created),
        })
    }

    async fn link_document(
        &self,
        document_id: &str,
        source: &str,
        nodes: &[NodeRef],
    ) -> Result<(), StoreWriteError> {
        let document = Query::new(format!(
            "MERGE (d:{} {{id: $id}}) SET d.source = $source",
            DOCUMENT_LABEL
        ))
        .param("id", document_id)
        .param("source", source);
        self.graph.run(document).await.map_err(write_error)?;

        // Group by label so each label needs one UNWIND.
        let mut by_label: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for node in nodes {
            by_label
                .entry(node.label.as_str())
                .or_default()
                .push(node.key.clone());
        }

        for (label, keys) in by_label {
            let query = Query::new(format!(
                "MATCH (d:{} {{id: $id}})
                 UNWIND $keys AS key
                 MATCH (n:`{}` {{dedup_key: key}})
                 MERGE (d)-[:{}]->(n)",
                DOCUMENT_LABEL, label, CONTAINS_ENTITY
            ))
            .param("id", document_id)
            .param("keys", keys);
            self.graph.run(query).await.map_err(write_error)?;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let node_count = self
            .count(&format!(
                "MATCH (n) WHERE NOT n:{} RETURN count(n) AS count",
                DOCUMENT_LABEL
            ))
            .await?;
        let relationship_count = self
            .count(&format!(
                "MATCH ()-[r]->() WHERE type(r) <> '{}' RETURN count(r) AS count",
                CONTAINS_ENTITY
            ))
            .await?;
        let document_count = self
            .count(&format!("MATCH (d:{}) RETURN count(d) AS count", DOCUMENT_LABEL))
            .await?;

        let query = Query::new(format!(
            "MATCH (n) WHERE NOT n:{} RETURN labels(n)[0] AS label, count(n) AS count",
            DOCUMENT_LABEL
        ));
        let mut result = self.graph.execute(query).await?;
        let mut nodes_by_label = BTreeMap::new();
        while let Some(row) = result.next().await? {
            let label = row.get::<String>("label").unwrap_or_default();
            let count = row.get::<i64>("count").unwrap_or(0) as usize;
            nodes_by_label.insert(label, count);
        }

        Ok(GraphStats {
            node_count,
            relationship_count,
            document_count,
            nodes_by_label,
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .context("Neo4j is not responding to queries")
    }
}

fn outcome(created: bool) -> UpsertOutcome {
    if created {
        UpsertOutcome::Created
    } else {
        UpsertOutcome::Updated
    }
}

/// `SET` clause with positional parameters. Names are schema identifiers.
fn set_clause(variable: &str, properties: &Properties) -> String {
    if properties.is_empty() {
        return String::new();
    }
    let assignments: Vec<String> = properties
        .keys()
        .enumerate()
        .map(|(i, name)| format!("{}.`{}` = $p{}", variable, name, i))
        .collect();
    format!("SET {}", assignments.join(", "))
}

fn bind_properties(query: Query, properties: &Properties) -> Query {
    properties
        .values()
        .enumerate()
        .fold(query, |query, (i, value)| {
            let name = format!("p{}", i);
            match value {
                PropertyValue::String(s) => query.param(&name, s.as_str()),
                PropertyValue::Int(n) => query.param(&name, *n),
                PropertyValue::Float(x) => query.param(&name, *x),
                PropertyValue::Bool(b) => query.param(&name, *b),
                PropertyValue::Date(d) => query.param(&name, *d),
            }
        })
}

fn write_error(err: neo4rs::Error) -> StoreWriteError {
    let message = err.to_string();
    if message.contains("ConstraintValidationFailed") {
        StoreWriteError::Rejected(message)
    } else {
        StoreWriteError::Unavailable(message)
    }
}
