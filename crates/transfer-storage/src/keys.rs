//! Session-scoped storage keys.
//!
//! Key format: `sessions/{token}/{filename}`. Both tiers use the same key so a
//! promotion is a copy between roots, not a rename.

use crate::traits::{StorageError, StorageResult};

const SESSION_PREFIX: &str = "sessions";

/// Prefix holding every object of one session, with a trailing slash.
pub fn session_prefix(session_token: &str) -> StorageResult<String> {
    validate_segment(session_token, "session token")?;
    Ok(format!("{}/{}/", SESSION_PREFIX, session_token))
}

pub fn session_file_key(session_token: &str, filename: &str) -> StorageResult<String> {
    validate_segment(filename, "filename")?;
    Ok(format!("{}{}", session_prefix(session_token)?, filename))
}

fn validate_segment(segment: &str, what: &str) -> StorageResult<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0')
    {
        return Err(StorageError::InvalidKey(format!(
            "Invalid {}: {:?}",
            what, segment
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_file_key_layout() {
        assert_eq!(
            session_file_key("abc123", "report (final).pdf").unwrap(),
            "sessions/abc123/report (final).pdf"
        );
    }

    #[test]
    fn test_rejects_path_segments() {
        assert!(session_file_key("abc", "../secret.pdf").is_err());
        assert!(session_file_key("abc", "dir\\file.pdf").is_err());
        assert!(session_file_key("..", "file.pdf").is_err());
        assert!(session_file_key("abc", "").is_err());
    }

    #[test]
    fn test_dotted_names_are_fine() {
        assert!(session_file_key("abc", "..hidden.pdf").is_ok());
    }
}
