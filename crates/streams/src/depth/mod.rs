pub mod cache;
pub mod events;
pub mod manager;

pub use cache::{DepthCache, LevelValue};
pub use events::{DepthDiff, PartialDepth};
pub use manager::{DepthCacheManager, DepthCacheOptions, SyncState};
