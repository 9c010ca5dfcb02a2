//! Markdown-aware text chunker.
//!
//! Chunking happens in two passes:
//!
//! 1. **Header split**: a [`Document`] is cut into [`Section`]s at markdown
//!    headers (`#` .. `####` by default). Header lines stay in the section
//!    text so readers see the heading inline. Each section inherits the
//!    document metadata plus a `Level N` entry for every enclosing header.
//! 2. **Window split**: each section is cut by a recursive character
//!    splitter into pieces of about `chunk_size` characters, with at least
//!    `chunk_overlap` characters carried from one chunk into the next. The
//!    splitter prefers paragraph breaks, then line breaks, then spaces, and
//!    only falls back to single characters for unbroken runs.
//!
//! Lengths are counted in `char`s, not bytes.
//!
//! ```rust
//! use markdown_rag_core::chunk::{chunk_documents, ChunkerOptions};
//! use markdown_rag_core::models::Document;
//!
//! let docs = vec![Document::new("intro.md", "# Intro\n\nHello world")];
//! let chunks = chunk_documents(&docs, &ChunkerOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata["Level 1"], "Intro");
//! ```

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::models::{header_key, Chunk, Document, Metadata, Section, SOURCE_FILENAME_KEY};

pub const DEFAULT_CHUNK_SIZE: usize = 250;
pub const DEFAULT_CHUNK_OVERLAP: usize = 30;
pub const DEFAULT_HEADER_LEVELS: usize = 4;

/// Separators tried in order by the window splitter. The empty separator
/// splits into single characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Chunker tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Deepest header level that starts a new section (1..=6).
    pub header_levels: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            header_levels: DEFAULT_HEADER_LEVELS,
        }
    }
}

impl ChunkerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if !(1..=6).contains(&self.header_levels) {
            bail!("header_levels must be between 1 and 6");
        }
        Ok(())
    }
}

/// Chunk every document, preserving document → section → window order.
pub fn chunk_documents(docs: &[Document], opts: &ChunkerOptions) -> Vec<Chunk> {
    docs.iter().flat_map(|doc| chunk_document(doc, opts)).collect()
}

/// Chunk a single document. Whitespace-only documents yield no chunks.
pub fn chunk_document(doc: &Document, opts: &ChunkerOptions) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for section in split_sections(doc, opts.header_levels) {
        for text in split_text(&section.text, opts.chunk_size, opts.chunk_overlap) {
            chunks.push(make_chunk(index, text, section.metadata.clone()));
            index += 1;
        }
    }

    chunks
}

// ============ Header split ============

/// Split a document into header-bounded sections.
///
/// Headers inside fenced code blocks are ignored. A header that directly
/// follows a shallower header with no body in between is folded into the
/// same section, so `# A\n## B\ntext` yields one section tagged with both
/// levels rather than a dangling `# A` section.
pub fn split_sections(doc: &Document, header_levels: usize) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut headers_only = true;
    let mut fence: Option<&'static str> = None;

    for line in doc.text.lines() {
        let trimmed = line.trim();

        if let Some(marker) = fence {
            if trimmed.starts_with(marker) {
                fence = None;
            }
            lines.push(line.trim_end());
            headers_only = false;
            continue;
        }

        if let Some(marker) = fence_marker(trimmed) {
            fence = Some(marker);
            lines.push(line.trim_end());
            headers_only = false;
            continue;
        }

        if let Some((level, title)) = parse_header(trimmed, header_levels) {
            let folds_into_current = headers_only
                && !lines.is_empty()
                && stack.last().map(|(l, _)| *l < level).unwrap_or(false);

            if !folds_into_current {
                flush_section(&mut sections, &mut lines, doc, &stack);
                headers_only = true;
            }

            stack.retain(|(l, _)| *l < level);
            stack.push((level, title.to_string()));
            lines.push(trimmed);
            continue;
        }

        if !trimmed.is_empty() {
            headers_only = false;
        }
        lines.push(line.trim_end());
    }

    flush_section(&mut sections, &mut lines, doc, &stack);
    sections
}

fn flush_section(
    sections: &mut Vec<Section>,
    lines: &mut Vec<&str>,
    doc: &Document,
    stack: &[(usize, String)],
) {
    let text = lines.join("\n");
    lines.clear();

    let text = text.trim();
    if text.is_empty() {
        return;
    }

    let mut metadata: Metadata = doc.metadata.clone();
    for (level, title) in stack {
        metadata.insert(header_key(*level), title.clone());
    }
    metadata.insert(SOURCE_FILENAME_KEY.to_string(), doc.source().to_string());

    sections.push(Section {
        text: text.to_string(),
        metadata,
    });
}

/// Returns `(level, title)` for an ATX header line such as `## Title`.
fn parse_header(line: &str, max_level: usize) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > max_level {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title))
}

fn fence_marker(line: &str) -> Option<&'static str> {
    if line.starts_with("```") {
        Some("```")
    } else if line.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

// ============ Window split ============

/// Split text into windows of about `chunk_size` characters where each
/// window repeats at least the last `chunk_overlap` characters of the one
/// before it. Text shorter than the window comes back as a single (trimmed)
/// piece.
///
/// The packing pass aims for `chunk_size`. A window that starts after a
/// paragraph break shares nothing with its predecessor, so it is widened
/// backwards over the tail of the previous window, preferring a word start.
/// Widened windows can exceed `chunk_size` by up to twice the overlap.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let windows = split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap);
    if chunk_overlap == 0 {
        return windows;
    }
    ensure_overlap(text, windows, chunk_overlap)
}

/// Widen each window so it starts at least `overlap` characters before the
/// end of the previous one. Windows are trimmed substrings of `text`, so
/// they are located by searching forward from the previous window's start.
fn ensure_overlap(text: &str, windows: Vec<String>, overlap: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(windows.len());
    let mut cursor = 0;
    let mut prev: Option<(usize, usize)> = None;

    for window in windows {
        let Some(found) = text[cursor..].find(window.as_str()) else {
            out.push(window);
            continue;
        };
        let start = cursor + found;
        let end = start + window.len();
        cursor = start + text[start..].chars().next().map_or(1, char::len_utf8);

        let from = match prev {
            Some((prev_start, prev_end)) if shared_len(text, start, prev_end) < overlap => {
                overlap_start(text, prev_start, prev_end, overlap)
            }
            _ => start,
        };
        out.push(text[from..end].to_string());
        prev = Some((from, end));
    }
    out
}

/// Characters shared by a window ending at `prev_end` and one starting at
/// `start`.
fn shared_len(text: &str, start: usize, prev_end: usize) -> usize {
    if start >= prev_end {
        0
    } else {
        char_len(&text[start..prev_end])
    }
}

/// Byte offset `overlap` characters before `prev_end`, moved back to the
/// start of its word when one begins within another `overlap` characters.
fn overlap_start(text: &str, prev_start: usize, prev_end: usize, overlap: usize) -> usize {
    let offsets: Vec<usize> = text[prev_start..prev_end]
        .char_indices()
        .map(|(i, _)| prev_start + i)
        .collect();
    if offsets.is_empty() {
        return prev_start;
    }
    let is_ws = |i: usize| {
        text[offsets[i]..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace)
    };

    let from = offsets.len().saturating_sub(overlap);
    let limit = from.saturating_sub(overlap);
    let word_start = (limit..=from)
        .rev()
        .find(|&j| !is_ws(j) && (j == 0 || is_ws(j - 1)));
    let from = word_start.unwrap_or_else(|| (0..=from).rev().find(|&j| !is_ws(j)).unwrap_or(0));
    offsets[from]
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let (idx, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, s)| s.is_empty() || text.contains(**s))
        .map(|(i, s)| (i, *s))
        .unwrap_or((separators.len(), ""));
    let finer = separators.get(idx + 1..).unwrap_or(&[]);

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
            fitting.clear();
        }

        if finer.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else {
            out.extend(split_recursive(piece, finer, chunk_size, chunk_overlap));
        }
    }

    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
    }

    out
}

/// Split on `separator`, attaching each separator to the piece that follows
/// it so joining the pieces reproduces the input exactly.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily pack pieces into windows, keeping a tail of at most
/// `chunk_overlap` characters as the head of the next window.
fn merge_pieces(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > chunk_size && !current.is_empty() {
            if let Some(window) = join_window(&current) {
                windows.push(window);
            }
            while total > chunk_overlap || (total > 0 && total + len > chunk_size) {
                match current.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }

        current.push_back(piece);
        total += len;
    }

    if let Some(window) = join_window(&current) {
        windows.push(window);
    }
    windows
}

fn join_window(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(index: i64, text: String, metadata: Metadata) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        chunk_index: index,
        text,
        metadata,
        hash,
    }
}
