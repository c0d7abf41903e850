use thiserror::Error as ThisError;

///
/// Error
///
/// Categorised boundary error for the query surface.
///
/// Build errors (`InvalidQuery`, `OutOfRange`, `MissingArgument`,
/// `Unsupported`) are raised before execution and carry a message naming
/// the offending type, property or query fragment. Runtime errors are
/// limited to storage I/O; accessor staleness is recovered internally and
/// only surfaces when recovery is impossible.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum Error {
    #[error("Invalid predicate: {message}")]
    InvalidQuery { message: String },

    #[error("{message}")]
    OutOfRange { message: String },

    #[error("{message}")]
    MissingArgument { message: String },

    #[error("Unsupported query: {message}")]
    Unsupported { message: String },

    #[error("stale accessor: {message}")]
    StaleAccessor { message: String },

    #[error("io error: {message}")]
    Io { message: String },
}

impl Error {
    pub(crate) fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    pub(crate) fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub(crate) fn stale_accessor(message: impl Into<String>) -> Self {
        Self::StaleAccessor {
            message: message.into(),
        }
    }

    /// Argument lookup failure with the exact count phrasing callers rely
    /// on in their own error reporting.
    pub(crate) fn missing_argument(index: usize, provided: usize) -> Self {
        let suffix = match provided {
            0 => "no arguments are provided".to_string(),
            1 => "only 1 argument is provided".to_string(),
            n => format!("only {n} arguments are provided"),
        };
        Self::MissingArgument {
            message: format!("Request for argument at index {index} but {suffix}"),
        }
    }

    /// Classifies errors raised before any row is scanned.
    #[must_use]
    pub const fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery { .. }
                | Self::OutOfRange { .. }
                | Self::MissingArgument { .. }
                | Self::Unsupported { .. }
        )
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn missing_argument_message_matches_each_count_form() {
        assert_eq!(
            Error::missing_argument(0, 0).to_string(),
            "Request for argument at index 0 but no arguments are provided"
        );
        assert_eq!(
            Error::missing_argument(1, 1).to_string(),
            "Request for argument at index 1 but only 1 argument is provided"
        );
        assert_eq!(
            Error::missing_argument(2, 2).to_string(),
            "Request for argument at index 2 but only 2 arguments are provided"
        );
    }

    #[test]
    fn build_errors_are_classified_before_execution() {
        assert!(Error::invalid_query("x").is_build_error());
        assert!(Error::missing_argument(0, 0).is_build_error());
        assert!(!Error::stale_accessor("x").is_build_error());
    }
}
