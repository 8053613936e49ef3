//! Path normalization for the target library tree.
//!
//! Pure functions: the same metadata always yields the same relative path.
//! Layout is `Author/Title`, or `Author/Series/NN - Title` when the book
//! belongs to a series.

use std::path::{Path, PathBuf};

/// Maximum length of a single path component, in characters.
pub const MAX_COMPONENT_LEN: usize = 200;

/// Appended when a component had to be truncated.
pub const TRUNCATION_MARKER: char = '…';

/// Sentinel used when the source provides no author.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Sentinel used when the source provides no usable title.
pub const UNTITLED: &str = "Untitled";

/// Characters that cannot appear in a path component on common filesystems.
const ILLEGAL: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Make one path component filesystem-safe.
///
/// Illegal and control characters become spaces, whitespace runs collapse to
/// a single space, surrounding spaces and trailing dots are trimmed, and the
/// result is capped at [`MAX_COMPONENT_LEN`] characters with a truncation
/// marker. Returns an empty string when nothing survives; callers substitute
/// their sentinel.
pub fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if ILLEGAL.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| c == ' ' || c == '.');

    truncate_component(trimmed)
}

fn truncate_component(s: &str) -> String {
    if s.chars().count() <= MAX_COMPONENT_LEN {
        return s.to_string();
    }

    let mut out: String = s.chars().take(MAX_COMPONENT_LEN - 1).collect();
    out.push(TRUNCATION_MARKER);
    out
}

/// Format a series index for path sorting: integer part zero-padded to two
/// digits, fractional part preserved ("1" → "01", "1.5" → "01.5").
///
/// An index that does not parse as a number is sanitized and used verbatim.
pub fn format_series_index(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.parse::<f64>().is_err() {
        return sanitize_component(trimmed);
    }

    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (trimmed, None),
    };

    let int_value: u64 = int_part.parse().unwrap_or(0);
    match frac_part {
        Some(f) if !f.is_empty() && f.chars().any(|c| c != '0') => {
            format!("{:02}.{}", int_value, f)
        }
        _ => format!("{:02}", int_value),
    }
}

/// Derive the canonical relative directory for a book.
///
/// `Author/Series/{index} - Title` when series data exists, `Author/Title`
/// otherwise. Metadata gaps map to sentinels; this function never fails.
pub fn normalize(
    author: &str,
    series: Option<&str>,
    series_index: Option<&str>,
    title: &str,
) -> PathBuf {
    let author_dir = non_empty_or(sanitize_component(author), UNKNOWN_AUTHOR);
    let title_dir = non_empty_or(sanitize_component(title), UNTITLED);

    let series_dir = series
        .map(sanitize_component)
        .filter(|s| !s.is_empty());

    match series_dir {
        Some(series_dir) => {
            let leaf = match series_index.map(format_series_index).filter(|i| !i.is_empty()) {
                Some(index) => truncate_component(&format!("{} - {}", index, title_dir)),
                None => title_dir,
            };
            PathBuf::from(author_dir).join(series_dir).join(leaf)
        }
        None => PathBuf::from(author_dir).join(title_dir),
    }
}

/// Append a deterministic disambiguator derived from the source identifier
/// to the final component of `path`.
///
/// Used when the normalized path is already claimed by a different source
/// identifier; re-runs with the same inputs always produce the same suffix.
pub fn disambiguate(path: &Path, source_id: &str) -> PathBuf {
    let leaf = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(" [{}]", sanitize_component(source_id));

    // Make room for the suffix inside the component cap.
    let budget = MAX_COMPONENT_LEN.saturating_sub(suffix.chars().count());
    let mut base: String = leaf.chars().take(budget).collect();
    base.push_str(&suffix);

    match path.parent() {
        Some(parent) if parent != Path::new("") => parent.join(base),
        _ => PathBuf::from(base),
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
