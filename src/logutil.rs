//! Log sanitization helpers. User-supplied text (mail bodies, bulletin
//! subjects, raw frames) is folded onto a single line before logging so one
//! hostile payload cannot forge extra log records.

const MAX_PREVIEW: usize = 300;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`, `\r` => `\\r`, `\t` => `\\t`
/// - backslash => `\\\\`
/// - other control characters => `\xNN`
///
/// Strings longer than the preview cap are truncated with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (seen, ch) in s.chars().enumerate() {
        if seen >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// UTF-8 safe truncation for log display; never slices inside a multi-byte
/// character. Inputs over `max_bytes` come back escaped with `...` appended.
pub fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::{escape_log, truncate_for_log};

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_log("a\nb\r\tc"), "a\\nb\\r\\tc");
        assert_eq!(escape_log("back\\slash"), "back\\\\slash");
        assert_eq!(escape_log("bell\x07"), "bell\\x07");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Each 'é' is two bytes; a naive byte cut would land mid-char.
        let s = "ééééé";
        let out = truncate_for_log(s, 8);
        assert!(out.ends_with("..."));
        assert!(out.is_char_boundary(out.len()));
    }

    #[test]
    fn short_input_is_untouched() {
        assert_eq!(truncate_for_log("hello", 100), "hello");
    }
}
