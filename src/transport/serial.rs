//! RS422 endpoint.
//!
//! The serial link carries the delimiter-framed protocol for a single
//! configured unit (the frame format has no APID field). Reads block with
//! a short poll timeout so the cancellation flag is observed; on an I/O
//! error the endpoint closes the device and reopens it with exponential
//! backoff. Responses are written atomically per frame.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{PduError, PduResult};
use crate::protocol::{encode_response_frame, FrameDecoder, FrameError, SerialFrame};

const READ_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

pub struct SerialEndpoint {
    path: String,
    baud: u32,
    apid: u16,
    dispatcher: Arc<Dispatcher>,
    cancel: Arc<AtomicBool>,
    port: Box<dyn SerialPort>,
    decoder: FrameDecoder,
}

impl SerialEndpoint {
    /// Open the configured device. A refused open is a startup failure
    /// and propagates to the supervisor.
    pub fn open(
        path: String,
        baud: u32,
        apid: u16,
        dispatcher: Arc<Dispatcher>,
        cancel: Arc<AtomicBool>,
    ) -> PduResult<Self> {
        let port = open_port(&path, baud)?;
        info!(%path, baud, "RS422 endpoint open");
        Ok(Self {
            path,
            baud,
            apid,
            dispatcher,
            cancel,
            port,
            decoder: FrameDecoder::new(),
        })
    }

    /// Blocking read loop; runs on a dedicated blocking task. The cancel
    /// flag is checked at every read poll.
    pub fn run(mut self) {
        let mut buf = [0u8; 256];
        while !self.cancel.load(Ordering::Relaxed) {
            match self.port.read(&mut buf) {
                Ok(0) => {
                    warn!("serial device reported end of stream");
                    if !self.reopen() {
                        return;
                    }
                }
                Ok(len) => {
                    self.decoder.extend(&buf[..len]);
                    self.drain_frames();
                }
                // Poll tick: nothing arrived within the soft timeout
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "serial read failed");
                    if !self.reopen() {
                        return;
                    }
                }
            }
        }
        info!("RS422 endpoint shutting down");
    }

    fn drain_frames(&mut self) {
        while let Some(result) = self.decoder.next_frame() {
            self.handle_frame(result);
        }
    }

    fn handle_frame(&mut self, result: Result<SerialFrame, FrameError>) {
        let response = match result {
            Ok(frame) => match frame.command() {
                Ok(command) => self.dispatcher.dispatch(self.apid, command),
                Err(PduError::UnknownMessage(id)) => {
                    self.dispatcher
                        .unknown_message(self.apid, id, frame.logical_unit_id)
                }
                Err(_) => {
                    self.dispatcher
                        .malformed_frame(self.apid, frame.message_id, frame.logical_unit_id)
                }
            },
            Err(frame_error) => {
                warn!(error = %frame_error.error, "discarding malformed frame");
                self.dispatcher.malformed_frame(
                    self.apid,
                    frame_error.message_id,
                    frame_error.logical_unit_id,
                )
            }
        };

        let Some(response) = response else { return };
        let frame = encode_response_frame(&response);
        let written = self
            .port
            .write_all(&frame)
            .and_then(|()| self.port.flush());
        if let Err(e) = written {
            warn!(error = %e, "serial write failed");
            self.reopen();
        }
    }

    /// Close and reopen the device with exponential backoff. Returns
    /// false when cancelled while waiting.
    fn reopen(&mut self) -> bool {
        let mut backoff = BACKOFF_MIN;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return false;
            }
            std::thread::sleep(backoff);
            match open_port(&self.path, self.baud) {
                Ok(port) => {
                    self.port = port;
                    self.decoder = FrameDecoder::new();
                    info!(path = %self.path, "RS422 endpoint reopened");
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "RS422 reopen failed");
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }
}

fn open_port(path: &str, baud: u32) -> PduResult<Box<dyn SerialPort>> {
    let port = serialport::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(READ_POLL_TIMEOUT)
        .open()?;
    Ok(port)
}
