//! Head/tail truncation of extracted text.
//!
//! Long documents are cut in the middle: the opening two thirds of the
//! budget and the closing third survive, joined by [`TRUNCATION_MARKER`].
//! Introductions and conclusions carry most of the signal about whether a
//! document is durable or time-bound, so the body is what gets dropped.
//!
//! Lengths are counted in `char`s, never bytes, so multi-byte text is never
//! split inside a code point.

/// Sentinel inserted where text was removed. Counted against the budget.
pub const TRUNCATION_MARKER: &str = "\n\n[...truncated...]\n\n";

/// Text after truncation plus whether anything was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    pub truncated: bool,
}

/// Bound `text` to at most `max_length` characters.
///
/// Returns the input unchanged when it already fits (`len == max_length`
/// included). Otherwise keeps `available * 2 / 3` leading characters and
/// the remaining `available - head` trailing characters, where `available`
/// is `max_length` minus the marker length.
///
/// A budget at or below the marker length leaves no room for any text, so
/// the result is the marker itself cut to `max_length` characters.
/// Callers that need the whole marker must pass a larger budget.
pub fn truncate_text(text: &str, max_length: usize) -> Truncated {
    let len = text.chars().count();
    if len <= max_length {
        return Truncated {
            text: text.to_string(),
            truncated: false,
        };
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_length <= marker_len {
        return Truncated {
            text: TRUNCATION_MARKER.chars().take(max_length).collect(),
            truncated: true,
        };
    }

    let available = max_length - marker_len;
    let head_len = available * 2 / 3;
    let tail_len = available - head_len;

    let mut out = String::with_capacity(max_length * 4);
    out.extend(text.chars().take(head_len));
    out.push_str(TRUNCATION_MARKER);
    out.extend(text.chars().skip(len - tail_len));

    Truncated {
        text: out,
        truncated: true,
    }
}
