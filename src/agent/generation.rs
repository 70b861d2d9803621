//! The generation worker: one streaming request, fragments typed into the PTY.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::context::ContextWindow;
use crate::provider::TextGenerator;
use crate::session::InputSink;

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationReport {
    Finished { fragments: usize, bytes: usize },
    Failed { reason: String },
    Cancelled { fragments: usize },
}

/// Everything a worker needs; cloned out of the agent per request.
pub struct GenerationJob {
    pub provider: Arc<dyn TextGenerator>,
    pub prompt: String,
    pub input: Arc<dyn InputSink>,
    pub context: Arc<Mutex<ContextWindow>>,
    pub record_injected_input: bool,
}

/// Handle on the in-flight worker.
pub struct Generation {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Generation {
    /// Start `job` on its own thread; the report is sent on `done`, wrapped
    /// into the receiver's message type by `wrap`.
    pub fn spawn<T, F>(job: GenerationJob, done: Sender<T>, wrap: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(GenerationReport) -> T + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let handle = thread::spawn(move || {
            let report = stream_into_session(job, &flag);
            let _ = done.send(wrap(report));
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Ask the worker to stop before its next fragment.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Reap a worker that has already reported.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("generation worker panicked");
            }
        }
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        // A worker blocked on a slow upstream read is left to finish on its
        // own; it exits at the next fragment boundary.
        self.cancel();
    }
}

fn stream_into_session(job: GenerationJob, cancel: &AtomicBool) -> GenerationReport {
    let stream = match job.provider.generate_text(&job.prompt) {
        Ok(stream) => stream,
        Err(e) => {
            return GenerationReport::Failed {
                reason: e.to_string(),
            };
        }
    };

    let mut fragments = 0usize;
    let mut bytes = 0usize;
    for item in stream {
        if cancel.load(Ordering::SeqCst) {
            debug!(fragments, "generation cancelled");
            return GenerationReport::Cancelled { fragments };
        }
        let fragment = match item {
            Ok(fragment) => fragment,
            Err(e) => {
                return GenerationReport::Failed {
                    reason: e.to_string(),
                };
            }
        };
        if let Err(e) = job.input.write_input(fragment.as_bytes()) {
            return GenerationReport::Failed {
                reason: e.to_string(),
            };
        }
        if job.record_injected_input {
            match job.context.lock() {
                Ok(mut ctx) => ctx.push_str(&fragment),
                Err(_) => {
                    return GenerationReport::Failed {
                        reason: "context lock poisoned".to_string(),
                    };
                }
            }
        }
        fragments += 1;
        bytes += fragment.len();
    }
    GenerationReport::Finished { fragments, bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FragmentStream, ProviderError};
    use crate::session::fake::RecordingInput;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Canned(Vec<&'static str>, Option<&'static str>);

    impl TextGenerator for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn generate_text(&self, _prompt: &str) -> Result<FragmentStream, ProviderError> {
            let mut items: Vec<Result<String, ProviderError>> =
                self.0.iter().map(|s| Ok(s.to_string())).collect();
            if let Some(reason) = self.1 {
                items.push(Err(ProviderError::Upstream(reason.to_string())));
            }
            Ok(Box::new(items.into_iter()))
        }
    }

    fn run(provider: Canned, record: bool) -> (GenerationReport, Arc<RecordingInput>, String) {
        let input = Arc::new(RecordingInput::default());
        let context = Arc::new(Mutex::new(ContextWindow::new(100)));
        let (tx, rx) = mpsc::channel();
        let generation = Generation::spawn(
            GenerationJob {
                provider: Arc::new(provider),
                prompt: "p".to_string(),
                input: input.clone(),
                context: context.clone(),
                record_injected_input: record,
            },
            tx,
            |r| r,
        );
        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        generation.join();
        let ctx = context.lock().unwrap().as_str().to_string();
        (report, input, ctx)
    }

    #[test]
    fn fragments_are_written_separately_and_recorded() {
        let (report, input, ctx) = run(Canned(vec!["ls", " -a", "\r"], None), true);
        assert_eq!(
            report,
            GenerationReport::Finished {
                fragments: 3,
                bytes: 6
            }
        );
        assert_eq!(input.writes(), vec![b"ls".to_vec(), b" -a".to_vec(), b"\r".to_vec()]);
        assert_eq!(ctx, "ls -a\r");
    }

    #[test]
    fn recording_can_be_disabled() {
        let (_, input, ctx) = run(Canned(vec!["pwd"], None), false);
        assert_eq!(input.concatenated(), "pwd");
        assert!(ctx.is_empty());
    }

    #[test]
    fn stream_error_keeps_written_prefix() {
        let (report, input, _) = run(Canned(vec!["ec"], Some("connection reset")), true);
        assert!(matches!(report, GenerationReport::Failed { ref reason } if reason.contains("connection reset")));
        assert_eq!(input.concatenated(), "ec");
    }
}
