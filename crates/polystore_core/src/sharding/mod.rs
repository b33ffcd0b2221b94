//! Shard maps and pluggable routing strategies.
//!
//! # Responsibility
//! - Parse and validate shard layouts from settings.
//! - Route shard keys to shards (resolution), expand a target into the shards
//!   to touch (selection), and run work against them (access).
//!
//! # Invariants
//! - Shard ids are unique and the map order is fixed at construction.
//! - Strategy names are resolved once when a store is created.
//! - Fan-out is best effort: successful shard work stays applied when other
//!   shards fail.

mod layout;
mod registry;
mod strategy;

pub use layout::{ShardConfig, ShardMap, ShardSpec};
pub use registry::{ShardStrategies, StrategyRegistry, StrategyRegistryError};
pub use strategy::{
    hash_shard_index, AccessOutcome, DefaultSelection, FirstShardSelection, HashResolution,
    LookupResolution, ParallelAccess, SequentialAccess, ShardAccessStrategy, ShardCall,
    ShardResolutionStrategy, ShardSelectionStrategy,
};
