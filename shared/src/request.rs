//! Command request wire types
//!
//! A client sends exactly one request per connection as a JSON object on a
//! single newline-terminated line:
//! ```text
//! {"executorID":"e1","command":"ping","params":[]}
//! ```
//!
//! The relay answers with one line of executor output, or (in structured
//! error mode) with an [`ErrorReply`].

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::LAUNCH_COMMAND;

/// Errors that can occur while parsing or validating a request
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid request JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Request has no executorID")]
    MissingExecutorId,

    #[error("Request has no command")]
    MissingCommand,

    #[error("Launch command needs at least 2 params, got {found}")]
    MissingLaunchParams { found: usize },
}

/// A parsed command request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Executor this request is routed to
    #[serde(rename = "executorID", default)]
    pub executor_id: String,

    /// Command name; `"launch"` fires the instrumentation launcher first
    #[serde(default)]
    pub command: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Vec<String>,

    /// The line exactly as received, without its terminator
    #[serde(skip)]
    pub raw: String,
}

/// Arguments handed to the instrumentation launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchArgs<'a> {
    /// First param: what to launch
    pub target: &'a str,
    pub executor_id: &'a str,
    /// Second param, passed through untouched
    pub extra: &'a str,
}

impl CommandRequest {
    /// Build a request for sending; `raw` stays empty
    pub fn new(
        executor_id: impl Into<String>,
        command: impl Into<String>,
        params: Vec<String>,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            command: command.into(),
            params,
            raw: String::new(),
        }
    }

    /// Parse and validate one request line
    ///
    /// A trailing `\n` or `\r\n` is stripped before parsing and is not part of
    /// [`CommandRequest::raw`].
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut request: CommandRequest = serde_json::from_str(line)?;

        if request.executor_id.is_empty() {
            return Err(RequestError::MissingExecutorId);
        }
        if request.command.is_empty() {
            return Err(RequestError::MissingCommand);
        }

        request.raw = line.to_string();
        Ok(request)
    }

    /// Serialize for the wire, without the trailing newline
    pub fn to_line(&self) -> Result<String, RequestError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check if this is a launch command
    pub fn is_launch(&self) -> bool {
        self.command == LAUNCH_COMMAND
    }

    /// Extract launcher arguments: `(params[0], executorID, params[1])`
    pub fn launch_args(&self) -> Result<LaunchArgs<'_>, RequestError> {
        match self.params.as_slice() {
            [target, extra, ..] => Ok(LaunchArgs {
                target,
                executor_id: &self.executor_id,
                extra,
            }),
            _ => Err(RequestError::MissingLaunchParams {
                found: self.params.len(),
            }),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Structured error line written back when the relay runs in structured error mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable snake_case error tag
    pub kind: String,
    pub message: String,
}

impl ErrorReply {
    /// Create a new error reply
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    /// Serialize for the wire, without the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
