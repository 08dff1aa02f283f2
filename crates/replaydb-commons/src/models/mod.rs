//! Shared model types for ReplayDB.

mod keys;
mod table_name;

pub use keys::{ChunkKey, ItemKey};
pub use table_name::TableName;
