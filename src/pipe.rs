use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

// Bounded in-memory pipe between the decompression thread and the log
// parser. Either side closing wakes the other.

const CAPACITY: usize = 1024 * 1024;

pub(crate) struct PipeReader {
    shared: Arc<Shared>,
}

pub(crate) struct PipeWriter {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
}

struct State {
    closed: bool,
    buf: VecDeque<u8>,
}

pub(crate) fn create() -> (PipeReader, PipeWriter) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            closed: false,
            buf: VecDeque::with_capacity(CAPACITY),
        }),
        condvar: Condvar::new(),
    });

    (
        PipeReader {
            shared: shared.clone(),
        },
        PipeWriter { shared },
    )
}

impl Shared {
    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            self.condvar.notify_all();
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::io::Read for PipeReader {
    fn read(&mut self, dest: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if !state.buf.is_empty() {
                let was_full = state.buf.len() >= CAPACITY;
                let n = dest.len().min(state.buf.len());
                for (slot, byte) in dest.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                if was_full {
                    self.shared.condvar.notify_all();
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = self.shared.condvar.wait(state).unwrap();
        }
    }
}

impl std::io::Write for PipeWriter {
    fn write(&mut self, src: &[u8]) -> std::io::Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.closed {
                return Ok(0);
            }
            if state.buf.len() < CAPACITY {
                let was_empty = state.buf.is_empty();
                let n = src.len().min(CAPACITY - state.buf.len());
                state.buf.extend(&src[..n]);
                if was_empty {
                    self.shared.condvar.notify_all();
                }
                return Ok(n);
            }
            state = self.shared.condvar.wait(state).unwrap();
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
