//! Pure text extraction: cross-reference candidates and diagnostic
//! fragments. Every rule is a named regex applied in a fixed order, so the
//! output is byte-identical for identical input.

use std::sync::LazyLock;

use regex::Regex;

/// How strongly a matched number looks like a real cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    High,
}

/// A candidate cross-reference. Existence is not verified here; the
/// orchestrator resolves candidates against the API and drops the 404s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefCandidate {
    pub number: u64,
    pub confidence: Confidence,
}

/// A raw diagnostic span found in free text, before truncation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMatch {
    /// Byte offset of the match start, used for non-overlap checks.
    pub start: usize,
    pub text: String,
}

// Reference rules, applied in this order.
static HASH_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d+)\b").unwrap());
static URL_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com/[\w.-]+/[\w.-]+/(?:issues|pull)/(\d+)\b").unwrap()
});
static KEYWORD_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:issue|pull request|pr)\s+(\d+)\b").unwrap()
});

// Diagnostic rules, applied in this order. Each captures a header line plus
// any directly following indented or frame-like lines.
static PYTHON_TRACEBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*Traceback \(most recent call last\):\r?\n(?:[ \t]+.*(?:\r?\n|$))*(?:\S.*)?")
        .unwrap()
});
static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^.*?(?:\w*(?:Error|Exception)\b:|panicked at\b).*(?:\r?\n(?:[ \t]+.*|[ \t]*at .*))*")
        .unwrap()
});

/// Scan free text for issue/PR reference candidates.
///
/// Returns candidates sorted by number, deduplicated keeping the highest
/// confidence seen for each number. Zero is never a valid reference.
pub fn extract_references(text: &str) -> Vec<RefCandidate> {
    let mut found: Vec<RefCandidate> = Vec::new();
    let rules: [(&Regex, Confidence); 3] = [
        (&HASH_REFERENCE, Confidence::High),
        (&URL_REFERENCE, Confidence::High),
        (&KEYWORD_REFERENCE, Confidence::Low),
    ];

    for (rule, confidence) in rules {
        for capture in rule.captures_iter(text) {
            let Some(number) = capture.get(1).and_then(|m| m.as_str().parse::<u64>().ok())
            else {
                continue;
            };
            if number == 0 {
                continue;
            }
            found.push(RefCandidate { number, confidence });
        }
    }

    found.sort_by(|a, b| {
        a.number
            .cmp(&b.number)
            .then(b.confidence.cmp(&a.confidence))
    });
    found.dedup_by_key(|c| c.number);
    found
}

/// Scan free text for error/stack-trace-looking spans.
///
/// Rules run in a fixed order; matches are kept in document order, overlaps
/// with an already-kept span are dropped, and each kept span is truncated on
/// a char boundary to `max_len`. At most `max_fragments` are returned.
pub fn extract_diagnostics(
    text: &str,
    max_fragments: usize,
    max_len: usize,
) -> Vec<DiagnosticMatch> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for rule in [&*PYTHON_TRACEBACK, &*ERROR_LINE] {
        for found in rule.find_iter(text) {
            spans.push((found.start(), found.end()));
        }
    }

    // Document order; earlier rules win ties on equal start.
    spans.sort_by_key(|&(start, end)| (start, std::cmp::Reverse(end)));

    let mut kept: Vec<DiagnosticMatch> = Vec::new();
    let mut last_end = 0_usize;
    for (start, end) in spans {
        if kept.len() >= max_fragments {
            break;
        }
        if !kept.is_empty() && start < last_end {
            continue;
        }
        let fragment = truncate_chars(text[start..end].trim_end(), max_len);
        if fragment.is_empty() {
            continue;
        }
        kept.push(DiagnosticMatch {
            start,
            text: fragment,
        });
        last_end = end;
    }
    kept
}

/// Truncate to at most `max_len` characters, never splitting a char.
pub fn truncate_chars(text: &str, max_len: usize) -> String {
    match text.char_indices().nth(max_len) {
        Some((boundary, _)) => text[..boundary].to_string(),
        None => text.to_string(),
    }
}
