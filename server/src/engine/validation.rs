use crate::error::{ChatError, ChatResult};

/// Default maximum message content length (bytes).
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4000;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 100;

/// Maximum server name length.
pub const MAX_SERVER_NAME_LENGTH: usize = 100;

/// Maximum server description length.
pub const MAX_SERVER_DESCRIPTION_LENGTH: usize = 1000;

/// Validate a server name. Must be 1-100 chars after trimming.
pub fn validate_server_name(name: &str) -> ChatResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("Server name cannot be empty"));
    }
    if name.chars().count() > MAX_SERVER_NAME_LENGTH {
        return Err(invalid(format!(
            "Server name too long (max {MAX_SERVER_NAME_LENGTH} characters)"
        )));
    }
    Ok(())
}

/// Validate an optional server description. Blank descriptions are dropped.
pub fn validate_server_description(description: Option<&str>) -> ChatResult<Option<String>> {
    let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if description.chars().count() > MAX_SERVER_DESCRIPTION_LENGTH {
        return Err(invalid(format!(
            "Server description too long (max {MAX_SERVER_DESCRIPTION_LENGTH} characters)"
        )));
    }
    Ok(Some(description.to_string()))
}

/// Validate a normalized channel name. 1-100 chars, no whitespace.
pub fn validate_channel_name(name: &str) -> ChatResult<()> {
    if name.is_empty() {
        return Err(invalid("Channel name cannot be empty"));
    }
    if name.chars().count() > MAX_CHANNEL_NAME_LENGTH {
        return Err(invalid(format!(
            "Channel name too long (max {MAX_CHANNEL_NAME_LENGTH} characters)"
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(invalid("Channel name cannot contain spaces"));
    }
    Ok(())
}

/// Validate message content. Must be non-blank and at most `max_len` bytes.
pub fn validate_message(content: &str, max_len: usize) -> ChatResult<()> {
    if content.trim().is_empty() {
        return Err(invalid("Message cannot be empty"));
    }
    if content.len() > max_len {
        return Err(invalid(format!("Message too long (max {max_len} bytes)")));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> ChatError {
    ChatError::InvalidArgument(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_names() {
        assert!(validate_server_name("Rustaceans").is_ok());
        assert!(validate_server_name("").is_err());
        assert!(validate_server_name("   ").is_err());
        assert!(validate_server_name(&"a".repeat(101)).is_err());
        assert!(validate_server_name(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn test_server_descriptions() {
        assert_eq!(validate_server_description(None).unwrap(), None);
        assert_eq!(validate_server_description(Some("  ")).unwrap(), None);
        assert_eq!(
            validate_server_description(Some(" Rust chat ")).unwrap().as_deref(),
            Some("Rust chat")
        );
        assert!(validate_server_description(Some(&"a".repeat(1000))).is_ok());
        assert!(validate_server_description(Some(&"a".repeat(1001))).is_err());
    }

    #[test]
    fn test_channel_names() {
        assert!(validate_channel_name("general").is_ok());
        assert!(validate_channel_name("a").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("has space").is_err());
        assert!(validate_channel_name("tab\there").is_err());
        assert!(validate_channel_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_message_validation() {
        assert!(validate_message("hello", 10).is_ok());
        assert!(validate_message("", 10).is_err());
        assert!(validate_message("   \n", 10).is_err());
        assert!(validate_message(&"a".repeat(11), 10).is_err());
        assert!(validate_message(&"a".repeat(10), 10).is_ok());
    }

    #[test]
    fn test_validation_errors_are_invalid_argument() {
        assert!(matches!(
            validate_message("", 10),
            Err(ChatError::InvalidArgument(_))
        ));
    }
}
