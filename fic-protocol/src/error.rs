use thiserror::Error;

/// Errors that may occur when parsing a command line.
///
/// These are local to one connection: the server answers `ERROR` and keeps serving.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseError {
    #[error("Empty command line")]
    Empty,
    #[error("Command line is not valid UTF-8")]
    InvalidUtf8,
    #[error("Received invalid command {0}")]
    UnknownCommand(String),
    #[error("{command} expects {expected} argument(s)")]
    MissingArgument {
        command: &'static str,
        expected: usize,
    },
    #[error("Invalid {what} {value:?}")]
    InvalidNumber { what: &'static str, value: String },
    #[error("Bitstream size must not be zero")]
    ZeroSize,
    #[error("Bitstream too large! Maximum is {max}, but got {got}")]
    TooLarge { max: usize, got: usize },
}
