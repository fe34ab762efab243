//! Scripted in-memory serial transport for tests

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use super::SerialTransport;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockState {
    written: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    pending: VecDeque<u8>,
    fail_writes: bool,
}

/// Transport that records every write and answers from a script
pub(crate) struct ScriptedPort {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`ScriptedPort`]
#[derive(Clone)]
pub(crate) struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl ScriptedPort {
    pub(crate) fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            ScriptedPort { state: state.clone() },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Queues the reply to the next write that has no responder
    pub(crate) fn queue_reply(&self, reply: &[u8]) {
        self.state.lock().unwrap().replies.push_back(reply.to_vec());
    }

    /// Answers every write through `f`
    pub(crate) fn set_responder(&self, f: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
        self.state.lock().unwrap().responder = Some(Box::new(f));
    }

    /// Makes bytes readable without a preceding write
    pub(crate) fn push_input(&self, bytes: &[u8]) {
        self.state.lock().unwrap().pending.extend(bytes.iter().copied());
    }

    /// Makes every later write fail
    pub(crate) fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub(crate) fn written_strings(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }

        let n = buf.len().min(state.pending.len());
        for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }

        state.written.push(buf.to_vec());
        let reply = match state.responder.as_mut() {
            Some(responder) => responder(buf),
            None => state.replies.pop_front().unwrap_or_default(),
        };
        state.pending.extend(reply);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialTransport for ScriptedPort {
    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().pending.clear();
        Ok(())
    }
}
