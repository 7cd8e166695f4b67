//! Debug session state machine
//!
//! A [`DebugSession`] serves one front-end connection. It runs a single
//! `select!` loop over front-end requests, debuggee client events and
//! debuggee process events, so every piece of session state is owned by
//! that loop.
//!
//! Requests that need a debuggee round trip park a [`Continuation`] in the
//! client and return; the response goes out when the reply (or its abort)
//! comes back from [`DebuggeeClient::next_event`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dap::protocol::{
    AttachArguments, Capabilities, DapRequest, EvaluateResponseBody, LaunchArguments,
    OutputEventBody, Request, Scope, SetBreakpointsArguments, SetVariableArguments, Source,
    StackFrame, StoppedEventBody, Thread, Variable,
};
use crate::dap::{FrontEnd, RequestTicket};
use crate::io::{DebuggeeProcess, ProcessEvent, Transport};
use crate::session::breakpoints::{BreakpointManager, PlannedBreakpoint};
use crate::session::config::SessionConfig;
use crate::session::error::SessionError;
use crate::session::handles::{HandleRegistry, VariableContainer};
use crate::session::paths::PathMapper;
use crate::wire::message::{
    BreakpointSpec, Command, DebuggeeEvent, DebuggeeMessage, FrameInfo, FrameScope, ThreadInfo,
    VariableInfo, render_value,
};
use crate::wire::{ClientEvent, DebuggeeClient, RetryPolicy, WireError};

/// Thread reported with `paused` stops, which name none
pub const THREAD_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Launching,
    Attaching,
    Running,
    Stopped,
    Terminated,
}

/// What to do when a debuggee reply arrives
#[derive(Debug)]
pub enum Continuation {
    /// Answer a front-end request
    Reply {
        ticket: RequestTicket,
        action: ReplyAction,
    },
    BreakpointsCleared { file: String },
    BreakpointInstalled { file: String, line: u32 },
    ScriptStarted,
}

/// How a successful reply becomes a response body
#[derive(Debug)]
pub enum ReplyAction {
    Threads,
    StackTrace {
        start_frame: usize,
        levels: Option<usize>,
    },
    Variables(VariableContainer),
    SetVariable { value: String },
    Continue,
    Step,
    Pause,
    Evaluate,
}

/// Result of handling a request
enum Outcome {
    /// Respond now with this body
    Respond(Option<Value>),
    /// A continuation will respond
    Deferred,
}

fn body<B: Serialize>(value: B) -> Result<Outcome, SessionError> {
    Ok(Outcome::Respond(Some(serde_json::to_value(value)?)))
}

/// Parse a reply `result`; a missing result reads as empty
fn parse_result<R: DeserializeOwned + Default>(result: Value) -> Result<R, serde_json::Error> {
    if result.is_null() {
        Ok(R::default())
    } else {
        serde_json::from_value(result)
    }
}

/// `<string>`, `<stdin>` and the like have no file behind them
fn is_pseudo_file(path: &str) -> bool {
    path.starts_with('<') && path.ends_with('>')
}

pub struct DebugSession<T: Transport> {
    front_end: FrontEnd<T>,
    state: SessionState,
    client: Option<DebuggeeClient<Continuation>>,
    process: Option<DebuggeeProcess>,
    process_events: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
    /// Attach sessions end with the debuggee connection
    terminate_on_close: bool,
    /// A terminated event has been sent for the current run
    terminated: bool,
    stop_on_entry: bool,
    paths: PathMapper,
    breakpoints: BreakpointManager,
    variables: HandleRegistry<VariableContainer>,
    sources: HandleRegistry<String>,
    /// Base for relative `cwd` and source roots
    adapter_dir: PathBuf,
    retry_policy: RetryPolicy,
}

impl<T: Transport> DebugSession<T> {
    pub fn new(transport: T, adapter_dir: PathBuf) -> Self {
        Self {
            front_end: FrontEnd::new(transport),
            state: SessionState::Uninitialized,
            client: None,
            process: None,
            process_events: None,
            terminate_on_close: false,
            terminated: false,
            stop_on_entry: false,
            paths: PathMapper::new(Vec::new(), &adapter_dir),
            breakpoints: BreakpointManager::new(),
            variables: HandleRegistry::new(),
            sources: HandleRegistry::new(),
            adapter_dir,
            retry_policy: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Serve the front end until it disconnects
    pub async fn run(mut self) {
        info!("Debug session started in {}", self.adapter_dir.display());

        loop {
            tokio::select! {
                request = self.front_end.next_request() => match request {
                    Ok(request) => self.handle_request(request).await,
                    Err(e) => {
                        info!("Front end disconnected: {}", e);
                        break;
                    }
                },
                event = next_client_event(&mut self.client) => {
                    self.handle_client_event(event).await;
                }
                event = next_process_event(&mut self.process_events) => match event {
                    Some(event) => self.handle_process_event(event).await,
                    None => self.process_events = None,
                },
            }
        }

        self.teardown().await;
        self.front_end.close().await;
        info!("Debug session finished");
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    // ------------------------------------------------------------------------
    // Front-end requests
    // ------------------------------------------------------------------------

    async fn handle_request(&mut self, request: DapRequest) {
        let ticket = RequestTicket::from(&request);
        let outcome = match Request::parse(&request.command, request.arguments) {
            Ok(parsed) => self.dispatch(&ticket, parsed).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(Outcome::Respond(body)) => self.front_end.respond(&ticket, Ok(body)).await,
            Ok(Outcome::Deferred) => {}
            Err(e) => {
                warn!("Request '{}' failed: {}", ticket.command, e);
                self.front_end.respond(&ticket, Err(e.to_string())).await;
            }
        }
    }

    async fn dispatch(
        &mut self,
        ticket: &RequestTicket,
        request: Request,
    ) -> Result<Outcome, SessionError> {
        match request {
            Request::Initialize => self.initialize().await,
            Request::Launch(args) => self.launch(args).await,
            Request::Attach(args) => self.attach(args).await,
            Request::ConfigurationDone => self.configuration_done().await,
            Request::SetBreakpoints(args) => self.set_breakpoints(args).await,
            Request::Threads => {
                self.forward(ticket, Command::GetThreads, ReplyAction::Threads)
                    .await
            }
            Request::StackTrace(args) => {
                let action = ReplyAction::StackTrace {
                    start_frame: args.start_frame.unwrap_or(0),
                    levels: args.levels.filter(|&levels| levels > 0),
                };
                self.forward(ticket, Command::GetStackTrace, action).await
            }
            Request::Scopes(args) => self.scopes(args.frame_id),
            Request::Variables(args) => {
                let container = self.container(args.variables_reference)?;
                let command = container.command();
                self.forward(ticket, command, ReplyAction::Variables(container))
                    .await
            }
            Request::SetVariable(args) => self.set_variable(ticket, args).await,
            Request::Continue => {
                self.forward(ticket, Command::Resume, ReplyAction::Continue)
                    .await
            }
            Request::Next => self.forward(ticket, Command::StepOver, ReplyAction::Step).await,
            Request::StepIn => self.forward(ticket, Command::StepInto, ReplyAction::Step).await,
            Request::StepOut => self.forward(ticket, Command::StepOut, ReplyAction::Step).await,
            Request::Pause(args) => {
                let command = Command::Suspend {
                    thread_ident: args.thread_id,
                };
                self.forward(ticket, command, ReplyAction::Pause).await
            }
            Request::Source(args) => {
                let content = self
                    .sources
                    .get(args.source_reference)
                    .cloned()
                    .ok_or(SessionError::UnknownSourceReference(args.source_reference))?;
                body(json!({ "content": content }))
            }
            Request::Evaluate(args) => {
                self.forward(ticket, Command::Evaluate(args), ReplyAction::Evaluate)
                    .await
            }
            Request::Disconnect => self.disconnect().await,
        }
    }

    /// Send `command` and answer `ticket` once the debuggee replies
    async fn forward(
        &mut self,
        ticket: &RequestTicket,
        command: Command,
        action: ReplyAction,
    ) -> Result<Outcome, SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        let continuation = Continuation::Reply {
            ticket: ticket.clone(),
            action,
        };
        client.request(command, continuation).await;
        Ok(Outcome::Deferred)
    }

    async fn initialize(&mut self) -> Result<Outcome, SessionError> {
        self.teardown().await;
        self.set_state(SessionState::Initialized);
        body(Capabilities {
            supports_configuration_done_request: true,
            supports_conditional_breakpoints: true,
            supports_set_variable: true,
        })
    }

    async fn launch(&mut self, args: LaunchArguments) -> Result<Outcome, SessionError> {
        let config = SessionConfig::for_launch(args, &self.adapter_dir);
        self.start(config, SessionState::Launching).await?;
        Ok(Outcome::Respond(None))
    }

    async fn attach(&mut self, args: AttachArguments) -> Result<Outcome, SessionError> {
        let config = SessionConfig::for_attach(args, &self.adapter_dir);
        self.start(config, SessionState::Attaching).await?;
        Ok(Outcome::Respond(None))
    }

    /// Reset per-run state, spawn the debuggee if there is one and start
    /// connecting to it
    async fn start(
        &mut self,
        config: SessionConfig,
        state: SessionState,
    ) -> Result<(), SessionError> {
        self.teardown().await;

        self.terminated = false;
        self.stop_on_entry = config.stop_on_entry;
        self.terminate_on_close = config.process.is_none();
        self.paths = PathMapper::new(config.source_roots, &config.working_dir);
        self.breakpoints = BreakpointManager::new();
        self.variables = HandleRegistry::new();
        self.sources = HandleRegistry::new();
        info!("Source roots: {:?}", self.paths.roots());

        if let Some(spec) = &config.process {
            let (sender, receiver) = mpsc::unbounded_channel();
            match DebuggeeProcess::spawn(spec, sender) {
                Ok(process) => {
                    self.process = Some(process);
                    self.process_events = Some(receiver);
                }
                Err(e) => {
                    error!("Failed to launch debuggee: {}", e);
                    self.output("stderr", format!("{e}\n")).await;
                    self.terminate().await;
                    return Err(e.into());
                }
            }
        }

        self.client = Some(DebuggeeClient::connect(config.endpoint, self.retry_policy));
        self.set_state(state);
        Ok(())
    }

    async fn configuration_done(&mut self) -> Result<Outcome, SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .request(Command::RunScript, Continuation::ScriptStarted)
            .await;
        self.set_state(SessionState::Running);
        Ok(Outcome::Respond(None))
    }

    async fn set_breakpoints(
        &mut self,
        args: SetBreakpointsArguments,
    ) -> Result<Outcome, SessionError> {
        let path = args.source.path.ok_or_else(|| {
            SessionError::InvalidArguments("setBreakpoints requires source.path".to_string())
        })?;
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SessionError::ReadSource {
                path: path.clone(),
                source,
            })?;

        let file_name = self.paths.to_debuggee(&path);
        debug!(
            "Replacing {} breakpoint(s) in {}",
            self.breakpoints.for_file(&path).len(),
            file_name
        );
        let planned = self.breakpoints.replace(&path, &text, &args.breakpoints);

        let cleared = Continuation::BreakpointsCleared {
            file: file_name.clone(),
        };
        client
            .request(
                Command::ClearBreakpoints {
                    file_name: file_name.clone(),
                },
                cleared,
            )
            .await;
        for breakpoint in planned.iter().filter(|breakpoint| breakpoint.verified) {
            let spec = BreakpointSpec {
                line_number: breakpoint.line,
                file_name: file_name.clone(),
                condition: breakpoint.condition.clone(),
                hit_condition: breakpoint.hit_condition.clone(),
                enabled: true,
            };
            let continuation = Continuation::BreakpointInstalled {
                file: file_name.clone(),
                line: breakpoint.line,
            };
            client
                .request(Command::SetBreakpoint(spec), continuation)
                .await;
        }

        let breakpoints: Vec<_> = planned.iter().map(PlannedBreakpoint::to_dap).collect();
        body(json!({ "breakpoints": breakpoints }))
    }

    fn scopes(&mut self, frame_id: i64) -> Result<Outcome, SessionError> {
        let locals = self
            .variables
            .create(VariableContainer::frame_scope(frame_id, FrameScope::Locals));
        let globals = self
            .variables
            .create(VariableContainer::frame_scope(frame_id, FrameScope::Globals));

        let scopes = [
            Scope {
                name: "Local",
                variables_reference: locals,
                expensive: false,
            },
            Scope {
                name: "Global",
                variables_reference: globals,
                expensive: false,
            },
        ];
        body(json!({ "scopes": scopes }))
    }

    async fn set_variable(
        &mut self,
        ticket: &RequestTicket,
        args: SetVariableArguments,
    ) -> Result<Outcome, SessionError> {
        let container = self.container(args.variables_reference)?;
        let command = Command::SetVariable {
            frame_id: container.frame_id(),
            name: container.lvalue(&args.name)?,
            value: args.value.clone(),
        };
        let action = ReplyAction::SetVariable { value: args.value };
        self.forward(ticket, command, action).await
    }

    fn container(&self, reference: i64) -> Result<VariableContainer, SessionError> {
        self.variables
            .get(reference)
            .cloned()
            .ok_or(SessionError::UnknownVariablesReference(reference))
    }

    async fn disconnect(&mut self) -> Result<Outcome, SessionError> {
        // The process exit and connection close still come back through the
        // loop and end the run
        if let Some(process) = self.process.as_mut()
            && let Err(e) = process.kill()
        {
            debug!("Debuggee not killed: {}", e);
        }
        if let Some(client) = self.client.as_mut() {
            client.close().await;
        }
        Ok(Outcome::Respond(None))
    }

    // ------------------------------------------------------------------------
    // Debuggee replies and events
    // ------------------------------------------------------------------------

    async fn handle_client_event(&mut self, event: ClientEvent<Continuation>) {
        match event {
            ClientEvent::Open => {
                info!("Connected to debuggee");
                self.set_state(SessionState::Running);
                self.front_end.emit("initialized", None).await;
            }
            ClientEvent::Response(continuation, reply) => {
                self.handle_reply(continuation, reply).await;
            }
            ClientEvent::Event(message) => {
                self.handle_debuggee_event(DebuggeeEvent::from(message))
                    .await;
            }
            ClientEvent::Error(WireError::Cancelled) => {
                debug!("Debuggee connection attempt cancelled");
            }
            ClientEvent::Error(e) => {
                error!("Debuggee connection failed: {}", e);
                self.output("stderr", format!("{e}\n")).await;
                self.terminate().await;
            }
            ClientEvent::Closed => {
                info!("Debuggee connection closed");
                if self.terminate_on_close {
                    self.terminate().await;
                }
            }
        }
    }

    async fn handle_reply(&mut self, continuation: Continuation, reply: Option<DebuggeeMessage>) {
        match continuation {
            Continuation::Reply { ticket, action } => {
                let outcome = match reply {
                    None => Err(SessionError::Aborted),
                    Some(message) if !message.is_ok() => {
                        Err(SessionError::CommandFailed(message.error_text()))
                    }
                    Some(message) => self.complete(action, message),
                };
                if let Err(e) = &outcome {
                    warn!("Request '{}' failed: {}", ticket.command, e);
                }
                self.front_end
                    .respond(&ticket, outcome.map_err(|e| e.to_string()))
                    .await;
            }
            Continuation::BreakpointsCleared { file } => match reply {
                Some(message) if message.is_ok() => debug!("Breakpoints cleared in {}", file),
                Some(message) => warn!(
                    "Failed to clear breakpoints in {}: {}",
                    file,
                    message.error_text()
                ),
                None => debug!("Clearing breakpoints in {} aborted", file),
            },
            Continuation::BreakpointInstalled { file, line } => match reply {
                Some(message) if message.is_ok() => {
                    debug!("Breakpoint set at {}:{}", file, line);
                }
                Some(message) => warn!(
                    "Failed to set breakpoint at {}:{}: {}",
                    file,
                    line,
                    message.error_text()
                ),
                None => debug!("Breakpoint at {}:{} aborted", file, line),
            },
            Continuation::ScriptStarted => match reply {
                Some(message) if message.is_ok() => debug!("Debugged program started"),
                Some(message) => warn!("runScript failed: {}", message.error_text()),
                None => debug!("runScript aborted"),
            },
        }
    }

    /// Response body for a successful reply
    fn complete(
        &mut self,
        action: ReplyAction,
        message: DebuggeeMessage,
    ) -> Result<Option<Value>, SessionError> {
        let body = match action {
            ReplyAction::Threads => {
                let threads: serde_json::Map<String, Value> = parse_result(message.result)?;
                let threads = threads
                    .into_iter()
                    .map(|(_, thread)| {
                        serde_json::from_value::<ThreadInfo>(thread).map(|thread| Thread {
                            id: thread.ident,
                            name: thread.name,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                json!({ "threads": threads })
            }
            ReplyAction::StackTrace {
                start_frame,
                levels,
            } => {
                let frames: Vec<FrameInfo> = parse_result(message.result)?;
                let total_frames = frames.len();
                let stack_frames: Vec<StackFrame> = frames
                    .into_iter()
                    .skip(start_frame)
                    .take(levels.unwrap_or(usize::MAX))
                    .map(|frame| self.stack_frame(frame))
                    .collect();
                json!({ "stackFrames": stack_frames, "totalFrames": total_frames })
            }
            ReplyAction::Variables(container) => {
                let entries: Vec<VariableInfo> = parse_result(message.result)?;
                let variables: Vec<Variable> = entries
                    .into_iter()
                    .map(|entry| {
                        let type_name = entry.base_type().to_string();
                        let variables_reference = if entry.has_children() {
                            self.variables
                                .create(container.child(&entry.name, &type_name, entry.id.clone()))
                        } else {
                            0
                        };
                        Variable {
                            value: render_value(&entry.value),
                            name: entry.name,
                            type_name,
                            variables_reference,
                        }
                    })
                    .collect();
                json!({ "variables": variables })
            }
            ReplyAction::SetVariable { value } => json!({ "value": value }),
            ReplyAction::Continue => {
                self.set_state(SessionState::Running);
                json!({ "allThreadsContinued": true })
            }
            ReplyAction::Step => {
                self.set_state(SessionState::Running);
                return Ok(None);
            }
            ReplyAction::Pause => return Ok(None),
            ReplyAction::Evaluate => serde_json::to_value(EvaluateResponseBody {
                result: render_value(&message.result["value"]),
                type_name: message
                    .result
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                variables_reference: 0,
            })?,
        };
        Ok(Some(body))
    }

    fn stack_frame(&mut self, frame: FrameInfo) -> StackFrame {
        let source = if is_pseudo_file(&frame.file_path) {
            let text = format!("Source for {} is not available.", frame.file_path);
            Source {
                name: frame.file_path,
                path: None,
                source_reference: Some(self.sources.create(text)),
            }
        } else {
            let name = Path::new(&frame.file_path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| frame.file_path.clone());
            let path = self.paths.to_client(&frame.file_path);
            Source {
                name,
                path: Some(path.to_string_lossy().into_owned()),
                source_reference: None,
            }
        };

        StackFrame {
            id: frame.id,
            name: frame.name,
            source,
            line: frame.line_number,
            column: 1,
        }
    }

    async fn handle_debuggee_event(&mut self, event: DebuggeeEvent) {
        match event {
            DebuggeeEvent::Start { banner } => info!(
                "Debuggee started: {}",
                banner.as_deref().unwrap_or("no banner")
            ),
            DebuggeeEvent::ProgramBreak {
                thread_ident,
                exception,
            } => {
                self.set_state(SessionState::Stopped);
                let stopped = match exception {
                    Some(exception) => StoppedEventBody {
                        reason: "exception".to_string(),
                        description: Some(exception.kind),
                        thread_id: thread_ident,
                        text: Some(exception.info),
                    },
                    None => StoppedEventBody {
                        reason: "breakpoint".to_string(),
                        description: None,
                        thread_id: thread_ident,
                        text: None,
                    },
                };
                self.front_end.emit_body("stopped", &stopped).await;
            }
            DebuggeeEvent::ProgramEnd => {
                info!("Debugged program ended");
                self.terminate().await;
            }
            DebuggeeEvent::Paused { reason } if reason == "entry" && !self.stop_on_entry => {
                debug!("Ignoring entry pause");
            }
            DebuggeeEvent::Paused { reason } => {
                self.set_state(SessionState::Stopped);
                let stopped = StoppedEventBody {
                    reason,
                    description: None,
                    thread_id: Some(THREAD_ID),
                    text: None,
                };
                self.front_end.emit_body("stopped", &stopped).await;
            }
            DebuggeeEvent::Unknown { command } => {
                warn!("Ignoring unknown debuggee event '{}'", command);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Debuggee process
    // ------------------------------------------------------------------------

    async fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output { stream, text } => self.output(stream.category(), text).await,
            ProcessEvent::Exited { code } => {
                if let Some(mut process) = self.process.take() {
                    process.mark_exited();
                }
                self.process_events = None;

                let status = code.map_or_else(|| "killed".to_string(), |code| code.to_string());
                self.output("console", format!("exit status: {status}\n"))
                    .await;
                self.terminate().await;
            }
        }
    }

    async fn output(&mut self, category: &'static str, output: String) {
        let body = OutputEventBody { category, output };
        self.front_end.emit_body("output", &body).await;
    }

    /// Emit the terminated event, once per run
    async fn terminate(&mut self) {
        self.set_state(SessionState::Terminated);
        if !self.terminated {
            self.terminated = true;
            self.front_end.emit("terminated", None).await;
        }
    }

    /// Kill the debuggee and drop the connection, failing every request
    /// still waiting on it
    async fn teardown(&mut self) {
        if let Some(mut process) = self.process.take() {
            info!("Stopping debuggee PID {:?}", process.pid());
            if let Err(e) = process.kill() {
                debug!("Debuggee not killed: {}", e);
            }
        }
        self.process_events = None;

        if let Some(mut client) = self.client.take() {
            client.close().await;
            for event in client.drain_events() {
                if let ClientEvent::Response(Continuation::Reply { ticket, .. }, _) = event {
                    self.front_end
                        .respond(&ticket, Err(SessionError::Aborted.to_string()))
                        .await;
                }
            }
        }
    }
}

async fn next_client_event(
    client: &mut Option<DebuggeeClient<Continuation>>,
) -> ClientEvent<Continuation> {
    match client {
        Some(client) => client.next_event().await,
        None => std::future::pending().await,
    }
}

/// `None` once the process side has nothing more to say
async fn next_process_event(
    events: &mut Option<mpsc::UnboundedReceiver<ProcessEvent>>,
) -> Option<ProcessEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
