//! ikp3db wire messages
//!
//! Outbound commands are `{"_id", "command", "args"}` objects. Everything
//! the debuggee sends, replies and pushed events alike, shares one shape
//! ([`DebuggeeMessage`]); replies are told apart only by a pending `_id`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

// ============================================================================
// Outbound commands
// ============================================================================

/// Which half of a frame's namespace `getFrameVariables` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScope {
    Locals,
    Globals,
}

/// A breakpoint as installed in the debuggee
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointSpec {
    pub line_number: u32,
    pub file_name: String,
    pub condition: Option<String>,
    /// Forwarded as-is; the debuggee does not implement hit counts
    pub hit_condition: Option<String>,
    pub enabled: bool,
}

/// Commands understood by the debuggee
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RunScript,
    ClearBreakpoints { file_name: String },
    SetBreakpoint(BreakpointSpec),
    GetThreads,
    GetStackTrace,
    GetFrameVariables { frame_id: i64, scope: FrameScope },
    GetProperties { id: Value, frame_id: i64 },
    SetVariable { frame_id: i64, name: String, value: String },
    Resume,
    StepOver,
    StepInto,
    StepOut,
    Suspend { thread_ident: Option<i64> },
    Evaluate(Value),
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::RunScript => "runScript",
            Command::ClearBreakpoints { .. } => "clearBreakpoints",
            Command::SetBreakpoint(_) => "setBreakpoint",
            Command::GetThreads => "getThreads",
            Command::GetStackTrace => "getStackTrace",
            Command::GetFrameVariables { .. } => "getFrameVariables",
            Command::GetProperties { .. } => "getProperties",
            Command::SetVariable { .. } => "setVariable",
            Command::Resume => "resume",
            Command::StepOver => "stepOver",
            Command::StepInto => "stepInto",
            Command::StepOut => "stepOut",
            Command::Suspend { .. } => "suspend",
            Command::Evaluate(_) => "evaluate",
        }
    }

    /// Argument object; commands without arguments send `{}`
    pub fn args(&self) -> Value {
        match self {
            Command::ClearBreakpoints { file_name } => json!({ "fileName": file_name }),
            Command::SetBreakpoint(spec) => json!(spec),
            Command::GetFrameVariables { frame_id, scope } => json!({
                "frame_id": frame_id,
                "f_locals": *scope == FrameScope::Locals,
                "f_globals": *scope == FrameScope::Globals,
            }),
            Command::GetProperties { id, frame_id } => json!({
                "id": id,
                "frame_id": frame_id,
            }),
            Command::SetVariable {
                frame_id,
                name,
                value,
            } => json!({
                "frame_id": frame_id,
                "name": name,
                "value": value,
            }),
            Command::Suspend {
                thread_ident: Some(ident),
            } => json!({ "thread_ident": ident }),
            Command::Evaluate(args) => args.clone(),
            Command::RunScript
            | Command::GetThreads
            | Command::GetStackTrace
            | Command::Resume
            | Command::StepOver
            | Command::StepInto
            | Command::StepOut
            | Command::Suspend { thread_ident: None } => json!({}),
        }
    }
}

/// Envelope of an outbound command
#[derive(Debug, Serialize)]
pub struct WireRequest {
    #[serde(rename = "_id")]
    pub id: u64,
    pub command: &'static str,
    pub args: Value,
}

impl WireRequest {
    pub fn new(id: u64, command: &Command) -> Self {
        Self {
            id,
            command: command.name(),
            args: command.args(),
        }
    }
}

// ============================================================================
// Inbound messages
// ============================================================================

/// Outcome reported by the debuggee for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Error,
    #[serde(other)]
    Other,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A reply or a pushed event from the debuggee
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebuggeeMessage {
    /// Echoed request id; pushed events carry none or one that matches nothing
    #[serde(rename = "_id", default)]
    pub id: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub command: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub exception: Option<ExceptionInfo>,
    #[serde(rename = "commandExecStatus", default)]
    pub exec_status: Option<ExecStatus>,
    #[serde(default)]
    pub thread_ident: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub info_messages: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warning_messages: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error_messages: Vec<String>,
}

impl DebuggeeMessage {
    /// Request id this message answers, if it has a usable one
    pub fn request_id(&self) -> Option<u64> {
        self.id.as_u64()
    }

    /// Anything but an explicit `"error"` status counts as success
    pub fn is_ok(&self) -> bool {
        self.exec_status != Some(ExecStatus::Error)
    }

    /// Failed reply standing in for one that did not parse
    pub fn malformed(command: String, error: &serde_json::Error) -> Self {
        Self {
            command,
            exec_status: Some(ExecStatus::Error),
            error_messages: vec![format!("Malformed reply from the debuggee: {error}")],
            ..Default::default()
        }
    }

    /// Error messages joined for display
    pub fn error_text(&self) -> String {
        if self.error_messages.is_empty() {
            format!("{} failed", self.command)
        } else {
            self.error_messages.join("\n")
        }
    }
}

/// Exception attached to a `programBreak`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExceptionInfo {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub info: String,
}

/// One entry of a `getThreads` result
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThreadInfo {
    #[serde(default)]
    pub ident: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// One entry of a `getStackTrace` result
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameInfo {
    #[serde(default)]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_path: String,
    #[serde(default)]
    pub line_number: i64,
}

/// One entry of a `getFrameVariables`/`getProperties` result
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VariableInfo {
    /// Debuggee-side object id, passed back verbatim to `getProperties`
    #[serde(default)]
    pub id: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub type_name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children_count: u64,
}

impl VariableInfo {
    /// Type name without display qualifiers: the text before the first space
    pub fn base_type(&self) -> &str {
        self.type_name.split(' ').next().unwrap_or_default()
    }

    pub fn has_children(&self) -> bool {
        self.children_count > 0
    }
}

/// Display text for a value reported by the debuggee
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Events the debuggee pushes on its own
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggeeEvent {
    Start { banner: Option<String> },
    ProgramBreak {
        thread_ident: Option<i64>,
        exception: Option<ExceptionInfo>,
    },
    ProgramEnd,
    Paused { reason: String },
    Unknown { command: String },
}

impl From<DebuggeeMessage> for DebuggeeEvent {
    fn from(message: DebuggeeMessage) -> Self {
        match message.command.as_str() {
            "start" => DebuggeeEvent::Start {
                banner: message.info_messages.get(2).cloned(),
            },
            "programBreak" => DebuggeeEvent::ProgramBreak {
                thread_ident: message.thread_ident,
                exception: message.exception,
            },
            "programEnd" => DebuggeeEvent::ProgramEnd,
            "paused" => DebuggeeEvent::Paused {
                reason: message
                    .result
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("pause")
                    .to_string(),
            },
            _ => DebuggeeEvent::Unknown {
                command: message.command,
            },
        }
    }
}
