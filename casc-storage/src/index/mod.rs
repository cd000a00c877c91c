//! Local `.idx` index files: the map from truncated encoded keys to
//! archive locations.

mod group;
mod shard;

pub use group::IndexGroup;
pub use shard::IndexShard;
