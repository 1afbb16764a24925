//! XBee API-mode framing for the Remote Link.
//!
//! ```text
//! 0x7E | length (u16 BE) | frame data ... | checksum
//! ```
//!
//! The checksum is `0xFF - (sum of frame data bytes)`.  In escaped mode
//! (`AP=2`) every byte after the start delimiter that collides with a
//! control byte is sent as `0x7D, byte ^ 0x20`; length and checksum are
//! always computed over the unescaped data.
//!
//! Outbound payloads travel in TX requests with a 16-bit destination.
//! Inbound RF data arrives in RX frames with either a 16-bit or a 64-bit
//! source address.

use kevinbot_types::DecodeError;
use tracing::trace;

pub const START_DELIMITER: u8 = 0x7E;
pub const ESCAPE: u8 = 0x7D;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;

pub const API_TX16: u8 = 0x01;
pub const API_RX64: u8 = 0x80;
pub const API_RX16: u8 = 0x81;
pub const API_TX_STATUS: u8 = 0x89;

/// 16-bit broadcast address.
pub const BROADCAST: u16 = 0xFFFF;

/// Largest RF payload an 802.15.4 module accepts in one TX request.
pub const MAX_RF_PAYLOAD: usize = 100;

/// Frames longer than this are treated as line noise.
const MAX_FRAME_LEN: usize = 512;

/// A decoded API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    Rx16 {
        source: u16,
        rssi: u8,
        options: u8,
        data: Vec<u8>,
    },
    Rx64 {
        source: u64,
        rssi: u8,
        options: u8,
        data: Vec<u8>,
    },
    TxStatus {
        frame_id: u8,
        status: u8,
    },
    Other {
        api_id: u8,
        body: Vec<u8>,
    },
}

impl ApiFrame {
    /// RF payload carried by receive frames.
    pub fn rf_data(&self) -> Option<&[u8]> {
        match self {
            ApiFrame::Rx16 { data, .. } | ApiFrame::Rx64 { data, .. } => Some(data),
            _ => None,
        }
    }

    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let short = |what: &str| DecodeError::Frame(format!("{what} frame too short ({} bytes)", data.len()));
        match data.first().copied() {
            Some(API_RX16) => {
                if data.len() < 5 {
                    return Err(short("rx16"));
                }
                Ok(ApiFrame::Rx16 {
                    source: u16::from_be_bytes([data[1], data[2]]),
                    rssi: data[3],
                    options: data[4],
                    data: data[5..].to_vec(),
                })
            }
            Some(API_RX64) => {
                if data.len() < 11 {
                    return Err(short("rx64"));
                }
                let mut source = [0u8; 8];
                source.copy_from_slice(&data[1..9]);
                Ok(ApiFrame::Rx64 {
                    source: u64::from_be_bytes(source),
                    rssi: data[9],
                    options: data[10],
                    data: data[11..].to_vec(),
                })
            }
            Some(API_TX_STATUS) => {
                if data.len() < 3 {
                    return Err(short("tx status"));
                }
                Ok(ApiFrame::TxStatus {
                    frame_id: data[1],
                    status: data[2],
                })
            }
            Some(api_id) => Ok(ApiFrame::Other {
                api_id,
                body: data[1..].to_vec(),
            }),
            None => Err(short("empty")),
        }
    }
}

fn checksum(data: &[u8]) -> u8 {
    0xFF - data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn needs_escape(byte: u8) -> bool {
    matches!(byte, START_DELIMITER | ESCAPE | XON | XOFF)
}

fn push_escaped(out: &mut Vec<u8>, byte: u8, escaped: bool) {
    if escaped && needs_escape(byte) {
        out.push(ESCAPE);
        out.push(byte ^ 0x20);
    } else {
        out.push(byte);
    }
}

/// Wrap raw frame data (API id first) into a delimited, checksummed frame.
pub fn encode_api_frame(frame_data: &[u8], escaped: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame_data.len() + 8);
    out.push(START_DELIMITER);
    let len = frame_data.len() as u16;
    for byte in len.to_be_bytes() {
        push_escaped(&mut out, byte, escaped);
    }
    for &byte in frame_data {
        push_escaped(&mut out, byte, escaped);
    }
    push_escaped(&mut out, checksum(frame_data), escaped);
    out
}

/// Build a TX request with a 16-bit destination address.
///
/// A `frame_id` of zero suppresses the TX status response.
pub fn encode_tx16(destination: u16, frame_id: u8, payload: &[u8], escaped: bool) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 5);
    data.push(API_TX16);
    data.push(frame_id);
    data.extend_from_slice(&destination.to_be_bytes());
    data.push(0x00);
    data.extend_from_slice(payload);
    encode_api_frame(&data, escaped)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    LengthHi,
    LengthLo,
    Data,
    Checksum,
}

/// Incremental API-frame decoder.
///
/// Feed it raw serial bytes; it yields a result for every completed (or
/// abandoned) frame and resynchronises on the next start delimiter.
#[derive(Debug)]
pub struct FrameDecoder {
    escaped: bool,
    stage: Stage,
    escape_next: bool,
    length: usize,
    data: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(escaped: bool) -> Self {
        Self {
            escaped,
            stage: Stage::Idle,
            escape_next: false,
            length: 0,
            data: Vec::new(),
        }
    }

    /// Feed a buffer, collecting every frame it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<ApiFrame, DecodeError>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Feed a single byte.
    pub fn push(&mut self, byte: u8) -> Option<Result<ApiFrame, DecodeError>> {
        // In escaped mode a raw delimiter can only ever mean "new frame".
        if byte == START_DELIMITER && (self.escaped || self.stage == Stage::Idle) {
            let abandoned = self.stage != Stage::Idle;
            self.begin();
            if abandoned {
                return Some(Err(DecodeError::Frame(
                    "frame interrupted by a new start delimiter".to_string(),
                )));
            }
            return None;
        }

        if self.stage == Stage::Idle {
            trace!(byte, "discarding byte outside of a frame");
            return None;
        }

        let byte = if self.escape_next {
            self.escape_next = false;
            byte ^ 0x20
        } else if self.escaped && byte == ESCAPE {
            self.escape_next = true;
            return None;
        } else {
            byte
        };

        match self.stage {
            Stage::Idle => None,
            Stage::LengthHi => {
                self.length = usize::from(byte) << 8;
                self.stage = Stage::LengthLo;
                None
            }
            Stage::LengthLo => {
                self.length |= usize::from(byte);
                if self.length == 0 || self.length > MAX_FRAME_LEN {
                    let length = self.length;
                    self.reset();
                    return Some(Err(DecodeError::Frame(format!("implausible frame length {length}"))));
                }
                self.stage = Stage::Data;
                None
            }
            Stage::Data => {
                self.data.push(byte);
                if self.data.len() == self.length {
                    self.stage = Stage::Checksum;
                }
                None
            }
            Stage::Checksum => {
                let data = std::mem::take(&mut self.data);
                self.reset();
                if checksum(&data) != byte {
                    return Some(Err(DecodeError::Frame(format!(
                        "checksum mismatch (expected {:#04x}, got {byte:#04x})",
                        checksum(&data)
                    ))));
                }
                Some(ApiFrame::parse(&data))
            }
        }
    }

    fn begin(&mut self) {
        self.reset();
        self.stage = Stage::LengthHi;
    }

    fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.escape_next = false;
        self.length = 0;
        self.data.clear();
    }
}
