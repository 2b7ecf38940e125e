#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Line-oriented command session carried over the USB CDC ACM link.
//!
//! Bytes arriving from the host are assembled into lines; each complete line
//! is handed to a [`LineHandler`] which writes a single response line. Report
//! lines produced by the acquisition task share the same outbound framing.

use core::fmt::{self, Write as _};
use core::str;

use heapless::{String, Vec};
use hx711_core::clock::Tick;
use hx711_core::device::SampleReport;
use hx711_core::driver::Hx711Driver;
use hx711_core::gpio::Gpio;
use hx711_core::protocol::commands::{CommandExecutor, CommandOutcome};

use crate::status::LinkCounters;

/// Maximum number of bytes accepted on a single line (excluding terminator).
pub const MAX_LINE_LEN: usize = 192;

/// Longest response or report line produced by the firmware.
pub const MAX_RESPONSE_LEN: usize = 96;

/// Payload size of one USB packet.
pub const FRAME_CAPACITY: usize = 64;

/// Outbound frames stay one byte short of a full packet so every write ends
/// the USB transfer.
pub const MAX_TX_CHUNK: usize = FRAME_CAPACITY - 1;

pub type LinkFrame = Vec<u8, FRAME_CAPACITY>;
pub type Response = String<MAX_RESPONSE_LEN>;

const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Errors surfaced by the line session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum LinkError {
    /// Encountered non-UTF-8 data in the assembled line buffer.
    InvalidUtf8,
    /// Input exceeded [`MAX_LINE_LEN`]; the whole line was discarded.
    LineOverflow,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::InvalidUtf8 => f.write_str("line is not valid UTF-8"),
            LinkError::LineOverflow => write!(f, "line exceeds {MAX_LINE_LEN} bytes"),
        }
    }
}

/// Consumer of complete command lines.
pub trait LineHandler {
    /// Handles `line` and writes the reply into `response`.
    fn handle_line(&mut self, line: &str, response: &mut Response);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SessionState {
    Disconnected,
    Connected,
    /// Discarding input until the end of an overlong line.
    Overflowed,
}

/// Assembles inbound bytes into lines for the active connection.
pub struct LineSession<H> {
    handler: H,
    buffer: Vec<u8, MAX_LINE_LEN>,
    state: SessionState,
}

impl<H> LineSession<H>
where
    H: LineHandler,
{
    pub const fn new(handler: H) -> Self {
        Self {
            handler,
            buffer: Vec::new(),
            state: SessionState::Disconnected,
        }
    }

    /// Marks the transport as connected (host raised DTR).
    pub fn on_connect(&mut self) {
        self.state = SessionState::Connected;
        self.buffer.clear();
    }

    /// Marks the transport as disconnected.
    pub fn on_disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.buffer.clear();
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Feeds a single byte. Returns `Ok(true)` once a line was handled and
    /// `response` holds its reply.
    pub fn ingest(&mut self, byte: u8, response: &mut Response) -> Result<bool, LinkError> {
        match (self.state, byte) {
            (SessionState::Disconnected, _) => Ok(false),
            (SessionState::Overflowed, b'\r' | b'\n') => {
                self.state = SessionState::Connected;
                Err(LinkError::LineOverflow)
            }
            (SessionState::Overflowed, _) => Ok(false),
            (SessionState::Connected, b'\r' | b'\n') => self.process_line(response),
            (SessionState::Connected, 0x08 | 0x7f) => {
                self.buffer.pop();
                Ok(false)
            }
            (SessionState::Connected, value) => {
                if self.buffer.push(value).is_err() {
                    self.buffer.clear();
                    self.state = SessionState::Overflowed;
                }
                Ok(false)
            }
        }
    }

    fn process_line(&mut self, response: &mut Response) -> Result<bool, LinkError> {
        if self.buffer.is_empty() {
            return Ok(false);
        }

        let result = match str::from_utf8(self.buffer.as_slice()) {
            Ok(line) => {
                response.clear();
                self.handler.handle_line(line.trim(), response);
                Ok(true)
            }
            Err(_) => Err(LinkError::InvalidUtf8),
        };
        self.buffer.clear();
        result
    }
}

/// Splits `line` plus a CRLF terminator into outbound frames.
pub fn encode_line(line: &str, mut emit: impl FnMut(LinkFrame)) {
    let bytes = line.bytes().chain(LINE_TERMINATOR.iter().copied());
    let mut frame = LinkFrame::new();
    for byte in bytes {
        if frame.len() == MAX_TX_CHUNK {
            emit(core::mem::take(&mut frame));
        }
        // Cannot fail: frames are flushed below capacity.
        let _ = frame.push(byte);
    }
    if !frame.is_empty() {
        emit(frame);
    }
}

/// Renders a report as its wire line.
pub fn report_line(report: &SampleReport) -> Response {
    let mut line = Response::new();
    let _ = write!(line, "{report}");
    line
}

/// Executes protocol lines against the shared driver at a fixed tick.
///
/// Built for one line while the driver lock is held.
pub struct DriverLines<'a, G: ?Sized> {
    pub executor: &'a mut CommandExecutor<Hx711Driver>,
    pub gpio: &'a mut G,
    pub counters: &'a LinkCounters,
    pub now: Tick,
}

impl<G> LineHandler for DriverLines<'_, G>
where
    G: Gpio + ?Sized,
{
    fn handle_line(&mut self, line: &str, response: &mut Response) {
        if line.eq_ignore_ascii_case("status") {
            let driver = self.executor.control();
            let snapshot = self.counters.snapshot();
            let _ = write!(
                response,
                "status now={} channels={} bus_pending={} reports={} dropped={}",
                self.now,
                driver.devices().count(),
                driver.bus().pending(),
                snapshot.reports_sent,
                snapshot.reports_dropped,
            );
            return;
        }

        let _ = match self.executor.execute(line, self.now, &mut *self.gpio) {
            Ok(CommandOutcome::Configured { oid }) => write!(response, "ok config_hx711 oid={oid}"),
            Ok(CommandOutcome::Querying { oid, first_wake }) => {
                write!(response, "ok query_hx711 oid={oid} first_wake={first_wake}")
            }
            Err(err) => {
                self.counters.record_rejected();
                write!(response, "error {err}")
            }
        };
    }
}
