//! Byte-level link to a drive.
//!
//! Both transports talk through a [`DriveLink`]: anything that can be read,
//! written, and told to drop whatever it has already buffered. Real hardware
//! uses a `serialport` handle; tests and dry runs use [`ScriptedLink`].
//!
//! Reads are bounded by the link's timeout. A timeout ends the current read
//! phase and is reported as "nothing (more) received", never as an error.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace};

use crate::error::PlatformResult;

/// A request/response byte channel to one drive (or one multidrop bus).
pub trait DriveLink: Read + Write + Send {
    /// Drop any bytes received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl DriveLink for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Baud rate and read timeout for one serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl LinkSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Open a serial device with 8N1 framing and the given settings.
pub fn open_serial(path: &str, settings: LinkSettings) -> PlatformResult<Box<dyn SerialPort>> {
    let port = serialport::new(path, settings.baud_rate)
        .timeout(settings.timeout())
        .open()?;
    debug!(
        "Opened {} at {} baud, timeout {} ms",
        path, settings.baud_rate, settings.timeout_ms
    );
    Ok(port)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Read one line (up to and including `\n`).
///
/// Returns `None` if the read timed out before any byte arrived, or the
/// partial line if it timed out midway.
pub fn read_line<L: DriveLink + ?Sized>(link: &mut L) -> io::Result<Option<String>> {
    let mut buf = [0u8; 1];
    let mut bytes = Vec::new();

    loop {
        match link.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {
                bytes.push(buf[0]);
                if buf[0] == b'\n' {
                    break;
                }
            }
            Err(e) if is_timeout(&e) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    if bytes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Read lines until the link goes quiet.
pub fn read_lines<L: DriveLink + ?Sized>(link: &mut L) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();
    while let Some(line) = read_line(link)? {
        let complete = line.ends_with('\n');
        lines.push(line);
        if !complete {
            break;
        }
    }
    Ok(lines)
}

/// Something that happened on a [`ScriptedLink`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Stale bytes dropped by [`DriveLink::discard_input`].
    Discarded(Vec<u8>),
    /// A complete line written by the transport, terminator included.
    Sent(String),
}

#[derive(Debug, Default)]
struct ScriptState {
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    tx: Vec<u8>,
    events: Vec<LinkEvent>,
}

/// In-memory link that answers each written line with the next queued reply.
///
/// Clones share state, so a test keeps one handle to script replies and
/// inspect traffic while the transport owns another. When no reply is queued
/// the link stays silent and reads time out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLink {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the reply to the next line written. An empty reply means silence.
    pub fn queue_reply(&self, reply: impl AsRef<[u8]>) {
        self.state().replies.push_back(reply.as_ref().to_vec());
    }

    /// Queue `count` silent replies.
    pub fn queue_silence(&self, count: usize) {
        for _ in 0..count {
            self.queue_reply(b"");
        }
    }

    /// Put bytes straight into the receive buffer, as if left over from an
    /// earlier exchange.
    pub fn inject_stale(&self, bytes: impl AsRef<[u8]>) {
        self.state().rx.extend(bytes.as_ref());
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        self.state().events.clone()
    }

    /// Lines written so far, terminators included.
    pub fn sent_lines(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                LinkEvent::Sent(line) => Some(line.clone()),
                LinkEvent::Discarded(_) => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Replies queued but not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.state().replies.len()
    }
}

impl Read for ScriptedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted link idle"));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        for &byte in buf {
            state.tx.push(byte);
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&state.tx).into_owned();
                state.tx.clear();
                state.events.push(LinkEvent::Sent(line));
                if let Some(reply) = state.replies.pop_front() {
                    state.rx.extend(reply);
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DriveLink for ScriptedLink {
    fn discard_input(&mut self) -> io::Result<()> {
        let mut state = self.state();
        let stale: Vec<u8> = state.rx.drain(..).collect();
        if !stale.is_empty() {
            trace!("Discarding {} stale bytes", stale.len());
            state.events.push(LinkEvent::Discarded(stale));
        }
        Ok(())
    }
}
