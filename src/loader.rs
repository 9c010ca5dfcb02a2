//! Markdown document loading.
//!
//! Walks a directory recursively, keeps files whose path relative to the
//! directory matches a glob, and decodes each one with a best-effort
//! encoding guess (BOM, then UTF-8, then Windows-1252 with a warning).
//!
//! A missing or unreadable directory is a [`RagError::Load`]; a directory
//! with no matching files yields an empty list.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use markdown_rag_core::models::Document;

use crate::error::{RagError, RagResult};

/// Load every file under `dir` whose relative path matches `glob`.
///
/// Documents are returned sorted by path so repeated runs produce the
/// same chunk order.
pub fn load_documents(dir: &Path, glob: &str) -> RagResult<Vec<Document>> {
    if !dir.is_dir() {
        return Err(RagError::Load(format!(
            "source directory does not exist or is not a directory: {}",
            dir.display()
        )));
    }

    let include = build_globset(&[glob.to_string()])?;
    let excludes = build_globset(&["**/.git/**".to_string()])?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| RagError::Load(format!("{}: {}", dir.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if excludes.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(&path)
            .map_err(|e| RagError::Load(format!("{}: {}", path.display(), e)))?;
        let (text, encoding) = detect_and_decode(&bytes);
        if encoding == Encoding::Windows1252 {
            tracing::warn!(
                path = %path.display(),
                "not valid UTF-8; decoded as Windows-1252, other legacy encodings will be garbled"
            );
        }
        docs.push(Document::new(path.to_string_lossy().to_string(), text));
    }

    tracing::debug!(dir = %dir.display(), count = docs.len(), "documents loaded");
    Ok(docs)
}

fn build_globset(patterns: &[String]) -> RagResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RagError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::Config(format!("invalid glob set: {}", e)))
}

/// Encoding a file was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Windows1252,
}

/// Decode file bytes, detecting the encoding.
///
/// Order: UTF-8 BOM, UTF-16 LE/BE BOM, valid UTF-8, then Windows-1252
/// (which maps every byte to some character, so decoding never fails).
pub fn detect_and_decode(bytes: &[u8]) -> (String, Encoding) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return (String::from_utf8_lossy(rest).into_owned(), Encoding::Utf8);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return (decode_utf16(rest, u16::from_le_bytes), Encoding::Utf16Le);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return (decode_utf16(rest, u16::from_be_bytes), Encoding::Utf16Be);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), Encoding::Utf8),
        Err(_) => (
            bytes.iter().map(|&b| windows_1252(b)).collect(),
            Encoding::Windows1252,
        ),
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Windows-1252 differs from Latin-1 only in 0x80..=0x9F.
fn windows_1252(b: u8) -> char {
    const HIGH: [char; 32] = [
        '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž',
        '\u{8F}', '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ',
        '\u{9D}', 'ž', 'Ÿ',
    ];
    match b {
        0x80..=0x9F => HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}
