//! Debug Adapter Protocol messages
//!
//! Only the subset this adapter speaks. Envelopes keep `arguments`/`body` as
//! raw JSON; [`Request::parse`] turns an envelope into a typed request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

// ============================================================================
// Envelopes
// ============================================================================

/// DAP request envelope.
#[derive(Debug, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// DAP response envelope.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

// ============================================================================
// Request arguments
// ============================================================================

/// `sourceRoot` accepts a single directory or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SourceRoots {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl SourceRoots {
    pub fn into_vec(self) -> Vec<PathBuf> {
        match self {
            SourceRoots::One(root) => vec![root],
            SourceRoots::Many(roots) => roots,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub python_path: Option<String>,
    #[serde(default)]
    pub ikp3db_args: Vec<String>,
    pub source_root: Option<SourceRoots>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub stop_on_entry: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    pub source_root: Option<SourceRoots>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub stop_on_entry: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArgument {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: SourceArgument,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub start_frame: Option<usize>,
    pub levels: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableArguments {
    pub variables_reference: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseArguments {
    pub thread_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    pub source_reference: i64,
}

/// Requests this adapter understands
#[derive(Debug)]
pub enum Request {
    Initialize,
    Launch(LaunchArguments),
    Attach(AttachArguments),
    ConfigurationDone,
    SetBreakpoints(SetBreakpointsArguments),
    Threads,
    StackTrace(StackTraceArguments),
    Scopes(ScopesArguments),
    Variables(VariablesArguments),
    SetVariable(SetVariableArguments),
    Continue,
    Next,
    StepIn,
    StepOut,
    Pause(PauseArguments),
    Source(SourceArguments),
    /// Arguments go to the debuggee untouched
    Evaluate(Value),
    Disconnect,
}

/// Why a request envelope could not be turned into a [`Request`]
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Unsupported request '{0}'")]
    Unsupported(String),

    #[error("Invalid arguments for '{command}': {source}")]
    InvalidArguments {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Request {
    pub fn parse(command: &str, arguments: Value) -> Result<Self, RequestError> {
        fn args<T: for<'de> Deserialize<'de>>(command: &str, arguments: Value) -> Result<T, RequestError> {
            serde_json::from_value(arguments).map_err(|source| RequestError::InvalidArguments {
                command: command.to_string(),
                source,
            })
        }

        // Requests may omit `arguments` entirely
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            arguments => arguments,
        };

        Ok(match command {
            "initialize" => Request::Initialize,
            "launch" => Request::Launch(args(command, arguments)?),
            "attach" => Request::Attach(args(command, arguments)?),
            "configurationDone" => Request::ConfigurationDone,
            "setBreakpoints" => Request::SetBreakpoints(args(command, arguments)?),
            "threads" => Request::Threads,
            "stackTrace" => Request::StackTrace(args(command, arguments)?),
            "scopes" => Request::Scopes(args(command, arguments)?),
            "variables" => Request::Variables(args(command, arguments)?),
            "setVariable" => Request::SetVariable(args(command, arguments)?),
            "continue" => Request::Continue,
            "next" => Request::Next,
            "stepIn" => Request::StepIn,
            "stepOut" => Request::StepOut,
            "pause" => Request::Pause(args(command, arguments)?),
            "source" => Request::Source(args(command, arguments)?),
            "evaluate" => Request::Evaluate(arguments),
            "disconnect" => Request::Disconnect,
            other => return Err(RequestError::Unsupported(other.to_string())),
        })
    }
}

// ============================================================================
// Response and event bodies
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_set_variable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: i64,
    pub verified: bool,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub source: Source,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: &'static str,
    pub variables_reference: i64,
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputEventBody {
    pub category: &'static str,
    pub output: String,
}
