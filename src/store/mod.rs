//! Persistence layer — document storage used by background jobs.

pub mod memory;
pub mod traits;

pub use memory::InMemoryDatabase;
pub use traits::{Database, SESSIONS};
