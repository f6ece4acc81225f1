use std::fmt;

/// Machine-readable error codes for operator and automation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    StoreNotInitialized,
    ConfigParseError,
    MalformedMessage,
    InvalidEnumValue,
    ActivityNotFound,
    InvalidTimeWindow,
    StoreUnavailable,
    StoreWriteFailed,
    ArchiveUnreadable,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::StoreNotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::MalformedMessage => "E2001",
            Self::InvalidEnumValue => "E2002",
            Self::ActivityNotFound => "E2003",
            Self::InvalidTimeWindow => "E2004",
            Self::StoreUnavailable => "E3001",
            Self::StoreWriteFailed => "E3002",
            Self::ArchiveUnreadable => "E4001",
            Self::LockContention => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::StoreNotInitialized => "Activity store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::MalformedMessage => "Malformed commit message",
            Self::InvalidEnumValue => "Unknown component or change type",
            Self::ActivityNotFound => "Activity not found",
            Self::InvalidTimeWindow => "Invalid time window",
            Self::StoreUnavailable => "Activity store unavailable",
            Self::StoreWriteFailed => "Activity store write failed",
            Self::ArchiveUnreadable => "Delta archive unreadable",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::StoreNotInitialized => Some("Run `authtrace init` to create the activity store."),
            Self::ConfigParseError => Some("Fix syntax in authtrace.toml and retry."),
            Self::MalformedMessage => Some("The message was dropped; fix the producer payload."),
            Self::InvalidEnumValue => {
                Some("Use one of the documented componentType/changeType tokens.")
            }
            Self::ActivityNotFound => None,
            Self::InvalidTimeWindow => Some("The base timestamp must not be after the head."),
            Self::StoreUnavailable => Some("Check the store path and file permissions."),
            Self::StoreWriteFailed => Some("The message will be redelivered; check disk space."),
            Self::ArchiveUnreadable => Some("Supply a zip archive of tab-separated delta files."),
            Self::LockContention => {
                Some("Another consumer holds the store lock; retry after it exits.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::StoreNotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::MalformedMessage,
            ErrorCode::InvalidEnumValue,
            ErrorCode::ActivityNotFound,
            ErrorCode::InvalidTimeWindow,
            ErrorCode::StoreUnavailable,
            ErrorCode::StoreWriteFailed,
            ErrorCode::ArchiveUnreadable,
            ErrorCode::LockContention,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::MalformedMessage.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }
}
