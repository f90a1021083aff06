pub mod collection_service;
pub mod ingest_service;
pub mod insight_service;

pub use collection_service::{CollectionError, CollectionService, SaveCollectionRequest};
pub use ingest_service::{DatasetSnapshot, IngestService, UploadSummary};
pub use insight_service::InsightService;
