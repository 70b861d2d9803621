//! Console agent: the loop that lets a text generator drive a shell.
//!
//! Output from the child is echoed to the operator, appended to a bounded
//! rolling context, and checked against the prompt detector. When the shell
//! sits at an idle prompt the context is sent to the provider and the
//! streamed fragments are typed back into the child. Operator keystrokes are
//! forwarded untouched the whole time.
//!
//! At most one generation is in flight. An idle trigger that arrives while
//! streaming is remembered once and re-checked when the stream ends.

pub mod generation;
pub mod terminal;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::context::ContextWindow;
use crate::detector::PromptDetector;
use crate::log::{ExecutionLog, LogEvent};
use crate::provider::TextGenerator;
use crate::session::{ChildExit, InputSink, PtySession, Session, SessionEvent};
use crate::state::{StateMachine, StateMachineError};

use generation::{Generation, GenerationJob, GenerationReport};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a console session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Success,
    Failure { code: u32, signal: Option<String> },
    Interrupted,
}

impl SessionOutcome {
    /// Process exit code for the host: 0, the child's code, or 130.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure { code, signal } => {
                if signal.is_some() || *code == 0 {
                    1
                } else {
                    i32::try_from(*code).unwrap_or(1)
                }
            }
            Self::Interrupted => 130,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Success => "success".to_string(),
            Self::Failure {
                code,
                signal: Some(sig),
            } => format!("failure (code {code}, signal {sig})"),
            Self::Failure { code, signal: None } => format!("failure (code {code})"),
            Self::Interrupted => "interrupted".to_string(),
        }
    }
}

impl From<ChildExit> for SessionOutcome {
    fn from(exit: ChildExit) -> Self {
        if exit.success() {
            Self::Success
        } else {
            Self::Failure {
                code: exit.code,
                signal: exit.signal,
            }
        }
    }
}

/// The agent's own phase, independent of whatever the shell is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentPhase {
    Idle,
    Streaming,
    Exited,
}

/// `Idle ⇄ Streaming`, either of them `→ Exited`, nothing out of `Exited`.
pub fn phase_machine() -> Result<StateMachine<AgentPhase, ()>, StateMachineError> {
    use AgentPhase::*;
    let mut builder = StateMachine::<AgentPhase, ()>::builder();
    builder.state(Idle).state(Streaming).state(Exited);
    builder
        .start(Idle)?
        .transition(Idle, Streaming)?
        .transition(Streaming, Idle)?
        .transition(Idle, Exited)?
        .transition(Streaming, Exited)?;
    builder.build()
}

/// Messages arriving at the agent loop.
enum LoopEvent {
    Session(SessionEvent),
    SessionClosed,
    GenerationDone(GenerationReport),
}

pub struct ConsoleAgent {
    settings: SessionSettings,
    detector: PromptDetector,
    provider: Arc<dyn TextGenerator>,
    log: Option<Arc<ExecutionLog>>,
}

impl ConsoleAgent {
    pub fn new(
        settings: SessionSettings,
        detector: PromptDetector,
        provider: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            settings,
            detector,
            provider,
            log: None,
        }
    }

    pub fn with_log(mut self, log: Arc<ExecutionLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Spawn the configured console and drive it until it exits or the
    /// operator interrupts.
    pub fn run(&self) -> Result<SessionOutcome> {
        // Terminal setup comes first: once the child exists, only `drive`
        // owns the path that kills it.
        let stop = Arc::new(AtomicBool::new(false));
        let raw_mode = terminal::RawModeGuard::enable_if_tty()?;
        if raw_mode.is_none() {
            // In raw mode Ctrl-C reaches the child as a byte instead.
            let stop_clone = stop.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                stop_clone.store(true, Ordering::Relaxed);
            }) {
                warn!("failed to install Ctrl-C handler: {e}");
            }
        }

        let spawn = self.settings.spawn_config();
        let mut session = PtySession::spawn(&spawn)
            .with_context(|| format!("failed to start console `{}`", spawn.program))?;
        info!(pid = ?session.pid(), provider = self.provider.name(), "console session started");
        self.record(LogEvent::SessionStarted {
            program: spawn.program.clone(),
            provider: self.provider.name().to_string(),
        });

        let operator = terminal::spawn_stdin_reader();
        let mut stdout = std::io::stdout();
        let outcome = self.drive(&mut session, Some(operator), &mut stdout, &stop);
        drop(raw_mode);

        match &outcome {
            Ok(outcome) => self.record(LogEvent::SessionEnded {
                result: outcome.label(),
            }),
            Err(e) => self.record(LogEvent::SessionEnded {
                result: format!("error: {e:#}"),
            }),
        }
        outcome
    }

    /// The transport-agnostic agent loop.
    ///
    /// Consumes `session`'s event stream, echoes output to `display`, and
    /// forwards `operator` bytes to the session input. Returns when the child
    /// exits or `stop` is raised. The child is killed and any in-flight
    /// generation is cancelled on every return path.
    pub fn drive(
        &self,
        session: &mut dyn Session,
        operator: Option<Receiver<Vec<u8>>>,
        display: &mut dyn Write,
        stop: &AtomicBool,
    ) -> Result<SessionOutcome> {
        let Some(events) = session.take_events() else {
            if let Err(e) = session.kill() {
                warn!("failed to kill console process: {e}");
            }
            bail!("session event stream was already taken");
        };
        let input = session.input();
        let session: &dyn Session = session;
        let mut teardown = Teardown {
            session,
            active: None,
        };
        let mut phase = phase_machine()?;

        let (tx, rx) = mpsc::channel();
        spawn_pump(events, tx.clone());
        if let Some(operator) = operator {
            spawn_operator_forwarder(operator, input.clone(), self.log.clone());
        }

        let context = Arc::new(Mutex::new(ContextWindow::new(
            self.settings.context_window.get(),
        )));
        let mut deferred = false;

        let outcome = loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested; ending console session");
                break SessionOutcome::Interrupted;
            }

            let event = match rx.recv_timeout(STOP_POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("agent event channel disconnected")
                }
            };

            match event {
                LoopEvent::Session(SessionEvent::Output(chunk)) => {
                    let _ = display.write_all(&chunk);
                    let _ = display.flush();

                    if !self.append_and_check(&context, &chunk)? {
                        continue;
                    }
                    match *phase.current() {
                        AgentPhase::Idle => {
                            let prompt = snapshot(&context)?;
                            phase.transition(AgentPhase::Streaming)?;
                            teardown.active =
                                Some(self.start_generation(prompt, &input, &context, &tx));
                        }
                        AgentPhase::Streaming if !deferred => {
                            debug!("idle prompt while streaming; deferring trigger");
                            deferred = true;
                            self.record(LogEvent::TriggerDeferred);
                        }
                        _ => {}
                    }
                }
                LoopEvent::GenerationDone(report) => {
                    if let Some(generation) = teardown.active.take() {
                        generation.join();
                    }
                    self.report_generation(&report);
                    phase.transition(AgentPhase::Idle)?;

                    if std::mem::take(&mut deferred) {
                        let prompt = snapshot(&context)?;
                        if self.detector.is_awaiting_input(&prompt) {
                            debug!("deferred trigger still idle; generating again");
                            phase.transition(AgentPhase::Streaming)?;
                            teardown.active =
                                Some(self.start_generation(prompt, &input, &context, &tx));
                        }
                    }
                }
                LoopEvent::Session(SessionEvent::Exited(exit)) => {
                    phase.transition(AgentPhase::Exited)?;
                    break SessionOutcome::from(exit);
                }
                LoopEvent::SessionClosed => {
                    bail!("console event stream ended before the process exited")
                }
            }
        };

        info!(outcome = %outcome.label(), "console session ended");
        Ok(outcome)
    }

    fn append_and_check(&self, context: &Mutex<ContextWindow>, chunk: &[u8]) -> Result<bool> {
        let mut ctx = context
            .lock()
            .map_err(|_| anyhow!("context lock poisoned"))?;
        ctx.push_bytes(chunk);
        Ok(self.detector.is_awaiting_input(ctx.as_str()))
    }

    fn start_generation(
        &self,
        prompt: String,
        input: &Arc<dyn InputSink>,
        context: &Arc<Mutex<ContextWindow>>,
        tx: &Sender<LoopEvent>,
    ) -> Generation {
        info!(
            provider = self.provider.name(),
            context_chars = prompt.chars().count(),
            "console idle; requesting generation"
        );
        self.record(LogEvent::GenerationRequested {
            provider: self.provider.name().to_string(),
            context: prompt.clone(),
        });
        Generation::spawn(
            GenerationJob {
                provider: self.provider.clone(),
                prompt,
                input: input.clone(),
                context: context.clone(),
                record_injected_input: self.settings.record_injected_input,
            },
            tx.clone(),
            LoopEvent::GenerationDone,
        )
    }

    fn report_generation(&self, report: &GenerationReport) {
        match report {
            GenerationReport::Finished { fragments, bytes } => {
                debug!(fragments, bytes, "generation finished");
                self.record(LogEvent::GenerationFinished {
                    fragments: *fragments,
                    bytes: *bytes,
                });
            }
            GenerationReport::Failed { reason } => {
                warn!(provider = self.provider.name(), "generation failed: {reason}");
                self.record(LogEvent::GenerationFailed {
                    reason: reason.clone(),
                });
            }
            GenerationReport::Cancelled { fragments } => {
                self.record(LogEvent::GenerationFailed {
                    reason: format!("cancelled after {fragments} fragments"),
                });
            }
        }
    }

    fn record(&self, event: LogEvent) {
        if let Some(log) = &self.log {
            if let Err(e) = log.log(event) {
                warn!("failed to write execution log: {e:#}");
            }
        }
    }
}

fn snapshot(context: &Mutex<ContextWindow>) -> Result<String> {
    let ctx = context
        .lock()
        .map_err(|_| anyhow!("context lock poisoned"))?;
    Ok(ctx.as_str().to_string())
}

/// Cancels the in-flight generation and kills the child when the loop ends,
/// however it ends.
struct Teardown<'a> {
    session: &'a dyn Session,
    active: Option<Generation>,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.active.take() {
            generation.cancel();
        }
        if let Err(e) = self.session.kill() {
            warn!("failed to kill console process: {e}");
        }
    }
}

fn spawn_pump(events: Receiver<SessionEvent>, tx: Sender<LoopEvent>) {
    thread::spawn(move || {
        for event in events {
            if tx.send(LoopEvent::Session(event)).is_err() {
                return;
            }
        }
        let _ = tx.send(LoopEvent::SessionClosed);
    });
}

fn spawn_operator_forwarder(
    operator: Receiver<Vec<u8>>,
    input: Arc<dyn InputSink>,
    log: Option<Arc<ExecutionLog>>,
) {
    thread::spawn(move || {
        for bytes in operator {
            if let Some(log) = &log {
                if let Err(e) = log.log(LogEvent::UserInput {
                    length: bytes.len(),
                }) {
                    warn!("failed to write execution log: {e:#}");
                }
            }
            if let Err(e) = input.write_input(&bytes) {
                debug!("operator input dropped: {e}");
                break;
            }
        }
    });
}
