//! Serial transports.
//!
//! [`SerialLineLink`] carries `\n`-terminated lines (Core Link, eye link).
//! [`XBeeLink`] carries the same lines wrapped in XBee API frames (Remote
//! Link).  Both spawn one reader thread per port that blocks on the
//! port's read timeout and forwards into an [`InboundFrames`] channel.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use kevinbot_types::{ComError, Link};
use serialport::SerialPort;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::adapter::{INBOUND_CAPACITY, Inbound, InboundFrames, LinkWriter};
use crate::xbee::{self, ApiFrame, FrameDecoder};

/// Where and how fast to open a port.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud: u32,
    /// Bound on every read and write.
    pub timeout: Duration,
}

fn open_port(link: Link, settings: &SerialSettings) -> Result<Box<dyn SerialPort>, ComError> {
    let mut builder = serialport::new(&settings.port, settings.baud).timeout(settings.timeout);
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    builder.open().map_err(|e| ComError::Open {
        link,
        details: format!("{}: {e}", settings.port),
    })
}

fn clone_port(link: Link, port: &dyn SerialPort) -> Result<Box<dyn SerialPort>, ComError> {
    port.try_clone().map_err(|e| ComError::Open {
        link,
        details: format!("cannot clone port handle: {e}"),
    })
}

/// Pause after a hard read error before reading again.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Report a hard read error; `false` once nobody is listening.
fn report_read_error(link: Link, tx: &mpsc::Sender<Inbound>, error: ComError) -> bool {
    warn!(%link, error = %error, "serial read failed");
    if tx.blocking_send(Err(error)).is_err() {
        return false;
    }
    thread::sleep(READ_RETRY_DELAY);
    true
}

fn is_retryable(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

fn spawn_reader<F>(link: Link, body: F) -> Result<(), ComError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{link}-reader"))
        .spawn(body)
        .map(|_| ())
        .map_err(|e| ComError::Open {
            link,
            details: format!("cannot spawn reader thread: {e}"),
        })
}

// ─── Line link ────────────────────────────────────────────────────────────────

/// A serial port speaking the `key=value` line protocol.
pub struct SerialLineLink {
    link: Link,
    port: Mutex<Box<dyn SerialPort>>,
}

impl SerialLineLink {
    /// Open the port and start its reader thread.
    pub fn open(link: Link, settings: &SerialSettings) -> Result<(Arc<Self>, InboundFrames), ComError> {
        let port = open_port(link, settings)?;
        let reader = clone_port(link, port.as_ref())?;
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        spawn_reader(link, move || read_lines(link, reader, tx))?;
        debug!(%link, port = %settings.port, baud = settings.baud, "serial line link open");
        Ok((
            Arc::new(Self {
                link,
                port: Mutex::new(port),
            }),
            rx,
        ))
    }
}

fn read_lines(link: Link, port: Box<dyn SerialPort>, tx: mpsc::Sender<Inbound>) {
    let mut reader = BufReader::new(port);
    let mut line = Vec::new();
    loop {
        // On a timeout `read_until` keeps the partial line in `line`.
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                if !report_read_error(link, &tx, ComError::io(link, "end of stream")) {
                    break;
                }
            }
            Ok(_) => {
                let complete = std::mem::take(&mut line);
                if complete.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                trace!(%link, bytes = complete.len(), "line received");
                if tx.blocking_send(Ok(complete)).is_err() {
                    break;
                }
            }
            Err(e) if is_retryable(e.kind()) => continue,
            Err(e) => {
                line.clear();
                if !report_read_error(link, &tx, ComError::io(link, e)) {
                    break;
                }
            }
        }
    }
    debug!(%link, "reader thread exiting");
}

impl LinkWriter for SerialLineLink {
    fn link(&self) -> Link {
        self.link
    }

    fn send(&self, line: &[u8]) -> Result<(), ComError> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(line).map_err(|e| ComError::io(self.link, e))
    }

    fn flush(&self) -> Result<(), ComError> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.flush().map_err(|e| ComError::io(self.link, e))
    }
}

// ─── XBee link ────────────────────────────────────────────────────────────────

/// Radio settings on top of the serial port.
#[derive(Debug, Clone)]
pub struct XBeeSettings {
    pub serial: SerialSettings,
    /// API mode 2 (escaped control bytes).
    pub escaped: bool,
    /// 16-bit destination of every TX request.
    pub destination: u16,
}

/// An XBee module in API mode.
///
/// Outbound lines are sent as TX-16 requests without their terminator;
/// inbound RF payloads are delivered as lines.
pub struct XBeeLink {
    port: Mutex<Box<dyn SerialPort>>,
    escaped: bool,
    destination: u16,
}

impl XBeeLink {
    pub fn open(settings: &XBeeSettings) -> Result<(Arc<Self>, InboundFrames), ComError> {
        let port = open_port(Link::Remote, &settings.serial)?;
        let reader = clone_port(Link::Remote, port.as_ref())?;
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let escaped = settings.escaped;
        spawn_reader(Link::Remote, move || read_frames(reader, escaped, tx))?;
        debug!(
            port = %settings.serial.port,
            baud = settings.serial.baud,
            escaped,
            destination = %format!("{:#06x}", settings.destination),
            "xbee link open"
        );
        Ok((
            Arc::new(Self {
                port: Mutex::new(port),
                escaped,
                destination: settings.destination,
            }),
            rx,
        ))
    }
}

fn read_frames(mut port: Box<dyn SerialPort>, escaped: bool, tx: mpsc::Sender<Inbound>) {
    let link = Link::Remote;
    let mut decoder = FrameDecoder::new(escaped);
    let mut buf = [0u8; 256];
    loop {
        let n = match port.read(&mut buf) {
            Ok(0) => {
                if report_read_error(link, &tx, ComError::io(link, "end of stream")) {
                    continue;
                }
                break;
            }
            Ok(n) => n,
            Err(e) if is_retryable(e.kind()) => continue,
            Err(e) => {
                if report_read_error(link, &tx, ComError::io(link, e)) {
                    continue;
                }
                break;
            }
        };
        for result in decoder.feed(&buf[..n]) {
            let item = match result {
                Ok(ApiFrame::TxStatus { frame_id, status }) => {
                    if status != 0 {
                        warn!(frame_id, status, "xbee transmit failed");
                    }
                    continue;
                }
                Ok(frame) => match frame.rf_data() {
                    Some(data) => Ok(data.to_vec()),
                    None => {
                        trace!(?frame, "ignoring non-data xbee frame");
                        continue;
                    }
                },
                Err(e) => Err(ComError::Decode(e)),
            };
            if tx.blocking_send(item).is_err() {
                debug!(%link, "reader thread exiting");
                return;
            }
        }
    }
    debug!(%link, "reader thread exiting");
}

impl LinkWriter for XBeeLink {
    fn link(&self) -> Link {
        Link::Remote
    }

    fn send(&self, line: &[u8]) -> Result<(), ComError> {
        let payload = line.strip_suffix(b"\n").unwrap_or(line);
        if payload.len() > xbee::MAX_RF_PAYLOAD {
            warn!(bytes = payload.len(), "payload exceeds one radio frame");
        }
        let frame = xbee::encode_tx16(self.destination, 0, payload, self.escaped);
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(&frame).map_err(|e| ComError::io(Link::Remote, e))
    }

    fn flush(&self) -> Result<(), ComError> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.flush().map_err(|e| ComError::io(Link::Remote, e))
    }
}
