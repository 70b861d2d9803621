//! Scripted in-memory session for driving the console agent in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{ChildExit, InputSink, Session, SessionError, SessionEvent};

/// Records every write call as a separate entry.
#[derive(Default)]
pub struct RecordingInput {
    writes: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl RecordingInput {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn concatenated(&self) -> String {
        String::from_utf8(self.writes().concat()).unwrap()
    }

    /// Poll until `pred` holds over the recorded writes.
    pub fn wait_for(&self, pred: impl Fn(&[Vec<u8>]) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if pred(&self.writes.lock().unwrap()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl InputSink for RecordingInput {
    fn write_input(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.writes.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

/// Session whose output and exit are pushed by the test through [`FakeChild`].
pub struct FakeSession {
    input: Arc<RecordingInput>,
    events: Option<Receiver<SessionEvent>>,
    kills: Arc<AtomicUsize>,
}

/// Test-side handle: emits output and exit events into a [`FakeSession`].
pub struct FakeChild {
    tx: Sender<SessionEvent>,
    pub input: Arc<RecordingInput>,
    pub kills: Arc<AtomicUsize>,
}

impl FakeSession {
    pub fn new() -> (Self, FakeChild) {
        let (tx, rx) = mpsc::channel();
        let input = Arc::new(RecordingInput::default());
        let kills = Arc::new(AtomicUsize::new(0));
        (
            Self {
                input: input.clone(),
                events: Some(rx),
                kills: kills.clone(),
            },
            FakeChild { tx, input, kills },
        )
    }
}

impl FakeChild {
    pub fn emit(&self, text: &str) {
        let _ = self.tx.send(SessionEvent::Output(text.as_bytes().to_vec()));
    }

    pub fn exit(&self, code: u32) {
        self.input.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(SessionEvent::Exited(ChildExit::with_code(code)));
    }

    pub fn exit_with_signal(&self, signal: &str) {
        self.input.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(SessionEvent::Exited(ChildExit {
            code: 1,
            signal: Some(signal.to_string()),
        }));
    }
}

impl Session for FakeSession {
    fn input(&self) -> Arc<dyn InputSink> {
        self.input.clone()
    }

    fn take_events(&mut self) -> Option<Receiver<SessionEvent>> {
        self.events.take()
    }

    fn kill(&self) -> Result<(), SessionError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
