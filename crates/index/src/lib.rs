pub mod applier;
pub mod builder;
pub mod mutation;
pub mod neo4j_store;
pub mod pipeline;
pub mod retry;
pub mod store;

pub use applier::{ApplyReport, MutationApplier, WriteFailure};
pub use builder::{BuildError, BuildOutput, GraphBuilder};
pub use mutation::{
    GlobalEntity, GraphMutation, MergePolicy, NodeUpsert, RelationshipUpsert, scoped_key,
};
pub use neo4j_store::Neo4jStore;
pub use pipeline::{ChunkFailure, DocumentReport, IngestPipeline, PipelineConfig, PipelineError};
pub use retry::RetryPolicy;
pub use store::{
    GraphSnapshot, GraphStats, GraphStore, InMemoryGraphStore, NodeRef, RelRef, StoreWriteError,
    UpsertOutcome, Upserted,
};
