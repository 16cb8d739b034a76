use std::sync::LazyLock;

use regex::Regex;

static NUMERIC_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z_:\-]*?0*(\d+)(?:\.\d+)?$").expect("accession pattern is valid")
});

/// Canonical comparison form of a symbol or identifier.
///
/// Upper-cases, then strips whitespace and ASCII punctuation from both ends.
/// Interior characters are left alone, so `HLA-A` and `C1orf112` keep their
/// shape. Total and idempotent.
pub fn normalize(value: &str) -> String {
    value
        .to_uppercase()
        .trim_matches(|ch: char| ch.is_whitespace() || ch.is_ascii_punctuation())
        .to_string()
}

pub fn strip_version_prefix(value: &str) -> Option<u64> {
    let normalized = normalize(value);
    let captures = NUMERIC_ACCESSION.captures(&normalized)?;
    captures.get(1)?.as_str().parse().ok()
}

pub fn accession_key(value: &str) -> String {
    let normalized = normalize(value);
    match normalized.rsplit_once('.') {
        Some((head, version))
            if !head.is_empty() && !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) =>
        {
            head.to_string()
        }
        _ => normalized,
    }
}

pub fn strip_trailing_digits(value: &str) -> String {
    normalize(value)
        .trim_end_matches(|ch: char| ch.is_ascii_digit())
        .to_string()
}

pub fn column_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_underscore = true;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
