//! Facade configuration: builder and per-call options.

mod builder;
mod options;

pub use builder::DocumentCacheBuilder;
pub use options::{BackoffKind, CacheOptions, OptimizedQueryOptions, RetryOptions};
