//! Input validation for user-supplied BBS fields.
//!
//! Everything a remote node types ends up in one of three places: the sled
//! store, a log line, or a pipe-delimited sync frame bound for a peer BBS.
//! The sync framing is the strictest consumer: `|` is the field delimiter
//! and a newline would terminate the frame, so subjects and names must not
//! carry either.

use thiserror::Error;

/// Maximum bytes accepted for a mail/bulletin subject.
pub const MAX_SUBJECT_BYTES: usize = 80;
/// Maximum bytes accepted for a mail/bulletin body.
pub const MAX_BODY_BYTES: usize = 2000;
/// Maximum bytes accepted for a channel name or URL/PSK.
pub const MAX_CHANNEL_FIELD_BYTES: usize = 200;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} is too long (maximum {max} bytes)")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} may not contain '|' or line breaks")]
    ReservedCharacters { field: &'static str },
}

/// Strip control characters (keeping newlines for bodies when `multiline`)
/// and trim surrounding whitespace.
pub fn sanitize_text(input: &str, multiline: bool) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || (multiline && *c == '\n'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn check_sync_safe(value: &str, field: &'static str) -> Result<(), FieldError> {
    if value.contains('|') || value.contains('\n') || value.contains('\r') {
        return Err(FieldError::ReservedCharacters { field });
    }
    Ok(())
}

fn check_single_line(
    input: &str,
    field: &'static str,
    max: usize,
) -> Result<String, FieldError> {
    let cleaned = sanitize_text(input, false);
    if cleaned.is_empty() {
        return Err(FieldError::Empty { field });
    }
    if cleaned.len() > max {
        return Err(FieldError::TooLong { field, max });
    }
    check_sync_safe(&cleaned, field)?;
    Ok(cleaned)
}

/// Validate a mail or bulletin subject. Returns the sanitized subject.
pub fn validate_subject(input: &str) -> Result<String, FieldError> {
    check_single_line(input, "subject", MAX_SUBJECT_BYTES)
}

/// Validate a mail or bulletin body. Bodies keep embedded newlines but may
/// not carry the sync frame delimiter.
pub fn validate_body(input: &str) -> Result<String, FieldError> {
    let cleaned = sanitize_text(input, true);
    if cleaned.is_empty() {
        return Err(FieldError::Empty { field: "message body" });
    }
    if cleaned.len() > MAX_BODY_BYTES {
        return Err(FieldError::TooLong {
            field: "message body",
            max: MAX_BODY_BYTES,
        });
    }
    if cleaned.contains('|') {
        return Err(FieldError::ReservedCharacters {
            field: "message body",
        });
    }
    Ok(cleaned)
}

/// Validate a channel directory name.
pub fn validate_channel_name(input: &str) -> Result<String, FieldError> {
    check_single_line(input, "channel name", MAX_CHANNEL_FIELD_BYTES)
}

/// Validate a channel URL or PSK string.
pub fn validate_channel_url(input: &str) -> Result<String, FieldError> {
    check_single_line(input, "channel URL", MAX_CHANNEL_FIELD_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trip() {
        assert_eq!(validate_subject("  Antenna swap  ").unwrap(), "Antenna swap");
    }

    #[test]
    fn subject_rejects_pipe() {
        assert!(matches!(
            validate_subject("a|b"),
            Err(FieldError::ReservedCharacters { .. })
        ));
    }

    #[test]
    fn subject_rejects_empty_and_overlong() {
        assert!(matches!(validate_subject("   "), Err(FieldError::Empty { .. })));
        let long = "x".repeat(MAX_SUBJECT_BYTES + 1);
        assert!(matches!(
            validate_subject(&long),
            Err(FieldError::TooLong { .. })
        ));
    }

    #[test]
    fn body_keeps_newlines_drops_controls() {
        let body = validate_body("line one\nline two\x07").unwrap();
        assert_eq!(body, "line one\nline two");
    }

    #[test]
    fn body_rejects_delimiter() {
        assert!(validate_body("ok\nbut|not").is_err());
    }

    #[test]
    fn channel_fields() {
        assert!(validate_channel_name("MediumFast Regional").is_ok());
        assert!(validate_channel_url("https://example.net/e/#chan").is_ok());
        assert!(validate_channel_url("").is_err());
    }
}
