//! Nickname validation shared by family creation and invite acceptance.

pub const NICKNAME_MIN_CHARS: usize = 1;
pub const NICKNAME_MAX_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NicknameError {
    #[error("nickname must not be empty")]
    TooShort,
    #[error("nickname must be at most 20 characters")]
    TooLong,
}

/// Validates a nickname and returns it trimmed.
///
/// Length is counted in characters, not bytes, after trimming surrounding whitespace.
pub fn validate_nickname(nickname: &str) -> Result<&str, NicknameError> {
    let trimmed = nickname.trim();
    let len = trimmed.chars().count();
    if len < NICKNAME_MIN_CHARS {
        return Err(NicknameError::TooShort);
    }
    if len > NICKNAME_MAX_CHARS {
        return Err(NicknameError::TooLong);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        assert_eq!(validate_nickname(""), Err(NicknameError::TooShort));
        assert_eq!(validate_nickname("   "), Err(NicknameError::TooShort));
        assert_eq!(validate_nickname("a"), Ok("a"));
        assert_eq!(validate_nickname(&"x".repeat(20)).map(str::len), Ok(20));
        assert_eq!(validate_nickname(&"x".repeat(21)), Err(NicknameError::TooLong));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let name = "ぽち".repeat(10);
        assert!(name.len() > NICKNAME_MAX_CHARS);
        assert!(validate_nickname(&name).is_ok());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(validate_nickname("  Mom "), Ok("Mom"));
    }
}
