//! Combines independently computed per-field confidence trees and renders
//! them as an auditable field list.

pub mod comparison;
pub mod merge;

pub use comparison::{flatten_for_comparison, ExtractionComparisonData, ExtractionComparisonItem};
pub use merge::{merge, MergeError, MergedConfidence, ScoreResolver};

/// Keys starting with this prefix are private to the producer and never merged.
pub const PRIVATE_KEY_PREFIX: char = '_';

pub(crate) fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

pub(crate) fn index_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}
