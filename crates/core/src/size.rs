//! Size estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per cost unit (token).
//! This approximation is accurate within ~10% for BPE tokenizers on English
//! text, which is all the budget walk needs.

/// Bytes charged per fragment on top of its content.
pub const FRAGMENT_OVERHEAD_BYTES: usize = 256;

/// Bytes charged per metadata entry.
pub const METADATA_ENTRY_OVERHEAD_BYTES: usize = 64;

/// Bytes charged per aspect tag or dependency id.
pub const TAG_OVERHEAD_BYTES: usize = 32;

/// Estimate the cost units for a string.
///
/// Heuristic: 1 unit ≈ 4 characters. Rounds up.
pub fn estimate_units(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate the in-memory footprint of a piece of content.
///
/// Content is counted twice (UTF-16-like worst case), plus a fixed overhead
/// for the fragment itself and for every metadata entry and tag it carries.
pub fn estimate_memory(content_len: usize, metadata_entries: usize, tags: usize) -> usize {
    content_len * 2
        + FRAGMENT_OVERHEAD_BYTES
        + metadata_entries * METADATA_ENTRY_OVERHEAD_BYTES
        + tags * TAG_OVERHEAD_BYTES
}
