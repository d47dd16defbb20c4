/// Ways a command can fail, each answered with its own status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The named resource (file, channel, layer) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The client asked for something the current state refuses.
    #[error("{0}")]
    ExpectedUserError(String),

    #[error("user error: {0}")]
    UserError(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Anything unclassified, including a panic inside the command.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn status(&self) -> ReplyStatus {
        match self {
            CommandError::NotFound(_) => ReplyStatus::NotFound,
            CommandError::ExpectedUserError(_)
            | CommandError::UserError(_)
            | CommandError::InvalidParameter(_) => ReplyStatus::Rejected,
            CommandError::MissingParameter(_) => ReplyStatus::MissingParameter,
            CommandError::Internal(_) => ReplyStatus::Internal,
        }
    }

    /// Operator hint logged next to the failure, if any.
    pub(crate) fn hint(&self) -> Option<&'static str> {
        match self {
            CommandError::NotFound(_) => Some("Turn on log level debug for stacktrace."),
            CommandError::ExpectedUserError(_) => None,
            CommandError::UserError(_) => Some("Check syntax. Turn on log level debug for stacktrace."),
            CommandError::MissingParameter(_) => Some("Missing parameter. Check syntax."),
            CommandError::InvalidParameter(_) => Some("Invalid parameter. Check syntax."),
            CommandError::Internal(_) => None,
        }
    }
}

/// Status line sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    Ok,
    MissingParameter,
    Rejected,
    NotFound,
    Overflow,
    Internal,
}

impl ReplyStatus {
    pub fn code(self) -> u16 {
        match self {
            ReplyStatus::Ok => 202,
            ReplyStatus::MissingParameter => 402,
            ReplyStatus::Rejected => 403,
            ReplyStatus::NotFound => 404,
            ReplyStatus::Overflow => 500,
            ReplyStatus::Internal => 501,
        }
    }

    /// Reply line for `command`, terminated with CRLF.
    ///
    /// Overflow replies carry no command name.
    pub fn reply(self, command: &str) -> String {
        match self {
            ReplyStatus::Ok => format!("{} {command} OK\r\n", self.code()),
            ReplyStatus::Overflow => format!("{} FAILED\r\n", self.code()),
            _ => format!("{} {command} FAILED\r\n", self.code()),
        }
    }
}
