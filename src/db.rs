pub mod collection_repository;
pub mod error;
pub mod models;

pub use collection_repository::CollectionRepository;
pub use error::DbError;
pub use models::*;
