//! Free-text video description parsing.
//!
//! Descriptions are scanned line by line. The first line starting with a
//! notation marker (case-insensitive, after trimming) supplies the combo
//! notation; a later line starting with a notes marker supplies the notes.
//!
//! [`playlist_note`] extracts the overall note from a playlist description.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest markers first so `inputs:` wins over `input:`.
const NOTATION_MARKERS: [&str; 4] = ["notation:", "inputs:", "combo:", "input:"];
const NOTES_MARKERS: [&str; 6] = ["comments:", "comment:", "notes:", "note:", "tips:", "tip:"];

pub const MAX_NOTATION_CHARS: usize = 500;
pub const MAX_NOTES_CHARS: usize = 300;

/// Longest first description line accepted as a playlist note.
pub const MAX_FIRST_LINE_NOTE_CHARS: usize = 200;
pub const DEFAULT_PLAYLIST_NOTE: &str = "No overall notes provided.";

static PLAYLIST_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)note:\s*(.+)").expect("valid playlist note regex"));

/// Structured fields extracted from a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDescription {
    pub notation: String,
    pub notes: Option<String>,
}

/// Why a description could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("no notation line found")]
    MissingNotation,

    #[error("notation is empty")]
    EmptyNotation,
}

/// Stateless description parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptionParser;

impl DescriptionParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> Result<ParsedDescription, ParseFailure> {
        let mut lines = raw.lines();

        let notation = lines
            .by_ref()
            .find_map(|line| strip_marker(line, &NOTATION_MARKERS))
            .ok_or(ParseFailure::MissingNotation)?;

        let notation = truncate_chars(&normalize_notation(notation), MAX_NOTATION_CHARS);
        if notation.is_empty() {
            return Err(ParseFailure::EmptyNotation);
        }

        let notes = lines
            .find_map(|line| strip_marker(line, &NOTES_MARKERS))
            .map(collapse_whitespace)
            .filter(|n| !n.is_empty())
            .map(|n| truncate_chars(&n, MAX_NOTES_CHARS));

        Ok(ParsedDescription { notation, notes })
    }
}

/// Overall note for a playlist.
///
/// The first `Note:` anywhere in the description wins (rest of its line).
/// Otherwise a short first line is used, and failing that the default note.
pub fn playlist_note(description: &str) -> String {
    let marked = PLAYLIST_NOTE
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|note| !note.is_empty());
    if let Some(note) = marked {
        return truncate_chars(note, MAX_NOTES_CHARS);
    }

    match description.lines().next().map(str::trim) {
        Some(first) if !first.is_empty() && first.chars().count() <= MAX_FIRST_LINE_NOTE_CHARS => {
            first.to_string()
        }
        _ => DEFAULT_PLAYLIST_NOTE.to_string(),
    }
}

/// Return the text after the first matching marker, if the line starts with one.
fn strip_marker<'a>(line: &'a str, markers: &[&str]) -> Option<&'a str> {
    let line = line.trim();
    markers.iter().find_map(|marker| {
        let head = line.get(..marker.len())?;
        head.eq_ignore_ascii_case(marker)
            .then(|| line[marker.len()..].trim())
    })
}

/// `,`, `->` and `→` separators become ` > `; empty steps and whitespace runs collapse.
fn normalize_notation(raw: &str) -> String {
    raw.replace("->", ">")
        .replace('→', ">")
        .replace(',', ">")
        .split('>')
        .map(collapse_whitespace)
        .filter(|step| !step.is_empty())
        .collect::<Vec<_>>()
        .join(" > ")
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}
