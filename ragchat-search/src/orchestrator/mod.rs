//! Search orchestrator: per-source fault tolerance, fan-out, merge, rank.
//!
//! Queries go to every requested source concurrently, each behind its own
//! fault-tolerant executor. Answers are filtered by threshold,
//! de-duplicated across sources, sorted by similarity and truncated. The
//! enhanced path then runs the relevance engine over the merged list.

pub mod dedup;
pub mod enhanced;
pub mod search;

pub use enhanced::{EnhancedSearchRequest, EnhancedSearchResponse, SearchTiming};
pub use search::{FanOutReport, SearchArgs, SearchOrchestrator, SourceError, SourceHealth};
