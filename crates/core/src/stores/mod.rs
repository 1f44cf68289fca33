pub mod memory;
pub mod qdrant;
pub mod sqlite;

pub use memory::{InMemoryRepository, InMemoryVectorIndex};
pub use qdrant::QdrantStore;
pub use sqlite::SqliteRepository;
