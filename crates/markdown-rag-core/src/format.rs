//! Text rendering of search results for the agent layer.
//!
//! The agent always receives renderable text: a numbered block of hits, a
//! fixed sentinel when nothing matched, or an error line.

use std::fmt::Display;
use std::fmt::Write as _;

use crate::models::SearchHit;

/// Returned in place of an empty result list.
pub const NO_RESULTS_MESSAGE: &str = "No relevant information found in the knowledge base.";

/// Prefix of the text returned when a search fails.
pub const SEARCH_ERROR_PREFIX: &str = "Error searching the knowledge base:";

/// Render hits in rank order.
///
/// ```text
/// Found 1 relevant document(s):
///
/// Document 1:
/// Source: guide.md
/// Context: Intro > Setup
/// Content: ...
/// ```
pub fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS_MESSAGE.to_string();
    }

    let mut out = format!("Found {} relevant document(s):\n\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let _ = write!(
            out,
            "Document {}:\nSource: {}\nContext: {}\nContent: {}\n\n",
            i + 1,
            hit.source_filename(),
            hit.header_path(),
            hit.text.trim()
        );
    }
    out
}

/// Render a search failure as text.
pub fn render_error(err: impl Display) -> String {
    format!("{} {}", SEARCH_ERROR_PREFIX, err)
}
