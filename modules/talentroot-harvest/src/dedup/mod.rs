//! Deduplication: identity normalization, fingerprinting, confidence-scored
//! matching, and non-destructive merging into canonical records.

pub mod engine;
pub mod matcher;
pub mod merge;
pub mod normalize;

pub use engine::{DedupEngine, DedupOutcome};
pub use matcher::{best_match, Match};
pub use merge::{merge_into, ConflictPolicy};
