#![warn(missing_docs)]
//! Core library for skillmatch: skill to learning-outcome to course retrieval.

pub mod aggregator;
pub mod config;
pub mod embedder;
pub mod embeddings;
pub mod error;
pub mod filter;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod ranking;
pub mod relevance;
pub mod retriever;
pub mod store;
pub mod telemetry;
pub mod vector_store;

pub use aggregator::CourseAggregator;
pub use embedder::ProviderRouter;
pub use embeddings::{
    EmbeddingConfiguration, EmbeddingDimension, EmbeddingResult, EmbeddingRole, EmbeddingRouter,
    EmbeddingUsage,
};
pub use error::RetrievalError;
pub use filter::{AcademicYearSemesters, CourseFilter};
pub use model::{
    Campus, CourseMatch, CourseOffering, CourseRecord, CourseWithOutcomes, EmbeddingVector,
    Faculty, LearningOutcome, MatchedLearningOutcome,
};
pub use orchestrator::{RetrievalOrchestrator, RetrievalRequest, RetrievalResponse};
pub use ranking::SearchLimits;
pub use relevance::{RelevanceFilter, RelevanceSettings};
pub use retriever::LearningOutcomeRetriever;
pub use store::{LearningOutcomeStore, MemoryStore, PgStore};
pub use vector_store::{CatalogTables, TableName};
