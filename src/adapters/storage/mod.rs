//! Storage Adapters
//!
//! Implementations of the configuration and execution record ports.
//!
//! ## Available Adapters
//!
//! - **FileDestinationRepository** - Destination configs as YAML files
//! - **InMemoryDestinationRepository** - Destination configs in memory
//! - **InMemoryExecutionRepository** - Recovered execution records in memory
//!
//! ## Usage
//!
//! ```ignore
//! use adapters::storage::{FileDestinationRepository, InMemoryDestinationRepository};
//!
//! // Production: file-based storage
//! let repo = FileDestinationRepository::new("./data/destinations");
//!
//! // Testing: in-memory storage
//! let repo = InMemoryDestinationRepository::new();
//! ```

mod file_destination_repository;
mod in_memory_destination_repository;
mod in_memory_execution_repository;

pub use file_destination_repository::FileDestinationRepository;
pub use in_memory_destination_repository::InMemoryDestinationRepository;
pub use in_memory_execution_repository::InMemoryExecutionRepository;
