//! Failure signature extraction.
//!
//! A signature is one line of output that stands in for "how this run
//! failed". The heuristic is deliberately simple and lossy; changing it
//! changes which failures are judged reproducible, so it must stay stable.

use crate::config::SignatureConfig;

/// Extract a signature from merged run output.
///
/// Lines are trimmed and blank lines skipped. The first line containing any
/// hint marker wins; otherwise the first non-blank line is used; otherwise
/// the signature is empty. The result is truncated to
/// `max_signature_length` characters.
pub fn extract_signature(output: &str, config: &SignatureConfig) -> String {
    let mut first_non_blank: Option<&str> = None;

    for line in output.split(is_line_break) {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if config
            .hint_markers
            .iter()
            .any(|hint| !hint.is_empty() && text.contains(hint.as_str()))
        {
            return truncate_chars(text, config.max_signature_length);
        }
        first_non_blank.get_or_insert(text);
    }

    first_non_blank
        .map(|text| truncate_chars(text, config.max_signature_length))
        .unwrap_or_default()
}

/// Line boundaries: `\n`, a lone `\r` (progress bars redraw with it), and
/// the vertical tab, form feed, file/group/record separators, NEL, and the
/// Unicode line and paragraph separators. `\r\n` yields an extra empty
/// piece, which the blank-line skip absorbs.
fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r'
            | '\x0b'
            | '\x0c'
            | '\x1c'
            | '\x1d'
            | '\x1e'
            | '\u{85}'
            | '\u{2028}'
            | '\u{2029}'
    )
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
