//! Command and acknowledgement frame encoding and decoding.
//!
//! The control protocol is binary and length-prefixed. Every frame is
//! self-delimiting, and encoding is a pure function of the command and its
//! parameters: no sequence numbers, no timestamps. Acknowledgements are
//! matched to commands by content alone.
//!
//! # Frame format
//!
//! ```text
//! +-------------+------+--------+----------------+
//! | length (2B) | kind | opcode | parameters ... |
//! | u16 BE      | (1B) | (1B)   |                |
//! +-------------+------+--------+----------------+
//!
//! kind:  0x43 'C' command   (client -> device)
//!        0x41 'A' ack       (device -> client)
//!        0x53 'S' status    (device -> client, unsolicited)
//! ```
//!
//! `length` counts every byte after the length field itself.
//!
//! An acknowledgement echoes the command's opcode and parameters and
//! appends a one-byte status (`0x00` = accepted):
//!
//! ```text
//! Command:  00 02 43 10                 StreamStart
//! Ack:      00 03 41 10 00              StreamStart accepted
//! ```
//!
//! All encoding/decoding in this module is pure -- no I/O is performed.

use bytes::{BufMut, Bytes, BytesMut};

use rxlink_core::{Error, Result, TunerChannel};

/// Size of the big-endian length prefix.
pub const HEADER_LEN: usize = 2;

/// Largest body accepted after the length prefix.
pub const MAX_BODY_LEN: usize = 1024;

/// Frame kind: command from client to device.
pub const KIND_COMMAND: u8 = 0x43;

/// Frame kind: acknowledgement from device to client.
pub const KIND_ACK: u8 = 0x41;

/// Frame kind: unsolicited status from device to client.
pub const KIND_STATUS: u8 = 0x53;

/// Acknowledgement status for an accepted command.
pub const STATUS_OK: u8 = 0x00;

const OP_HELLO: u8 = 0x01;
const OP_IDENTIFY: u8 = 0x02;
const OP_CONFIGURE: u8 = 0x03;
const OP_STREAM_START: u8 = 0x10;
const OP_STREAM_STOP: u8 = 0x11;
const OP_SET_FREQUENCY: u8 = 0x20;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// The command set understood by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// First bootstrap command: open the device session.
    Hello,
    /// Second bootstrap command: exchange identification.
    Identify,
    /// Third bootstrap command: apply the streaming configuration.
    Configure,
    /// Ask the device to begin sending IQ samples.
    StreamStart,
    /// Ask the device to stop sending IQ samples.
    StreamStop,
    /// Retune one tuner channel.
    SetFrequency {
        /// Target tuner channel.
        channel: TunerChannel,
        /// Frequency in hertz.
        frequency_hz: u64,
    },
}

impl Command {
    /// The bootstrap sequence issued on every connect, in order.
    pub const BOOTSTRAP: [Command; 3] = [Command::Hello, Command::Identify, Command::Configure];

    /// The opcode byte carried on the wire.
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Hello => OP_HELLO,
            Command::Identify => OP_IDENTIFY,
            Command::Configure => OP_CONFIGURE,
            Command::StreamStart => OP_STREAM_START,
            Command::StreamStop => OP_STREAM_STOP,
            Command::SetFrequency { .. } => OP_SET_FREQUENCY,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Hello => "hello",
            Command::Identify => "identify",
            Command::Configure => "configure",
            Command::StreamStart => "stream_start",
            Command::StreamStop => "stream_stop",
            Command::SetFrequency { .. } => "set_frequency",
        }
    }
}

// ---------------------------------------------------------------------------
// Codec trait
// ---------------------------------------------------------------------------

/// How an inbound frame relates to the command awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMatch {
    /// The frame acknowledges the pending command and the device accepted it.
    Accepted,
    /// The frame acknowledges the pending command but the device refused it.
    Rejected {
        /// Non-zero status byte reported by the device.
        status: u8,
    },
    /// A well-formed frame that is not the pending command's acknowledgement
    /// (status report, or an ack for some earlier command).
    Unrelated,
    /// The frame could not be decoded.
    Malformed(String),
}

/// Pluggable, stateless command codec.
///
/// Implementations must be deterministic: the same command always encodes
/// to byte-identical frames, because acknowledgements are matched on frame
/// content.
pub trait MessageCodec: Send + Sync + 'static {
    /// Encode a command into a complete, self-delimiting frame.
    fn encode(&self, command: &Command) -> Bytes;

    /// Classify `frame` against the `pending` command frame.
    fn classify(&self, pending: &[u8], frame: &[u8]) -> AckMatch;
}

/// The default binary codec described in the module documentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl MessageCodec for FrameCodec {
    fn encode(&self, command: &Command) -> Bytes {
        encode_command(command)
    }

    fn classify(&self, pending: &[u8], frame: &[u8]) -> AckMatch {
        let pending = match split_frame(pending) {
            Ok((KIND_COMMAND, body)) => body,
            Ok((kind, _)) => {
                return AckMatch::Malformed(format!(
                    "pending frame is not a command (kind 0x{kind:02X})"
                ));
            }
            Err(e) => return AckMatch::Malformed(e.to_string()),
        };

        match split_frame(frame) {
            Ok((KIND_ACK, body)) => {
                let Some((&status, echoed)) = body.split_last() else {
                    return AckMatch::Malformed("empty acknowledgement".into());
                };
                if echoed.is_empty() {
                    return AckMatch::Malformed("acknowledgement without opcode".into());
                }
                if echoed != pending {
                    return AckMatch::Unrelated;
                }
                if status == STATUS_OK {
                    AckMatch::Accepted
                } else {
                    AckMatch::Rejected { status }
                }
            }
            Ok((KIND_STATUS, _)) => AckMatch::Unrelated,
            Ok((kind, _)) => AckMatch::Malformed(format!("unknown frame kind 0x{kind:02X}")),
            Err(e) => AckMatch::Malformed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a command frame.
///
/// Example: `StreamStop` encodes to `00 02 43 11`.
pub fn encode_command(command: &Command) -> Bytes {
    let mut body = BytesMut::with_capacity(16);
    body.put_u8(KIND_COMMAND);
    put_command_body(&mut body, command);
    prefix_length(&body)
}

/// Build the acknowledgement a device would send for `command_frame`.
///
/// Fails if `command_frame` is not a well-formed command frame.
pub fn encode_ack(command_frame: &[u8], status: u8) -> Result<Bytes> {
    let body = match split_frame(command_frame)? {
        (KIND_COMMAND, body) => body,
        (kind, _) => {
            return Err(Error::Protocol(format!(
                "cannot acknowledge a non-command frame (kind 0x{kind:02X})"
            )));
        }
    };
    let mut ack = BytesMut::with_capacity(body.len() + 2);
    ack.put_u8(KIND_ACK);
    ack.put_slice(body);
    ack.put_u8(status);
    Ok(prefix_length(&ack))
}

/// Encode an unsolicited status frame carrying an opaque payload.
///
/// Payloads longer than [`MAX_BODY_LEN`] - 1 bytes are truncated.
pub fn encode_status(payload: &[u8]) -> Bytes {
    let take = payload.len().min(MAX_BODY_LEN - 1);
    let mut body = BytesMut::with_capacity(take + 1);
    body.put_u8(KIND_STATUS);
    body.put_slice(&payload[..take]);
    prefix_length(&body)
}

fn put_command_body(buf: &mut BytesMut, command: &Command) {
    buf.put_u8(command.opcode());
    if let Command::SetFrequency {
        channel,
        frequency_hz,
    } = command
    {
        buf.put_u32(channel.index());
        buf.put_u64(*frequency_hz);
    }
}

fn prefix_length(body: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u16(body.len() as u16);
    frame.put_slice(body);
    frame.freeze()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Split a complete frame into `(kind, body-after-kind)`.
///
/// The length prefix must describe the rest of the frame exactly.
pub fn split_frame(frame: &[u8]) -> Result<(u8, &[u8])> {
    if frame.len() < HEADER_LEN + 1 {
        return Err(Error::Protocol(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    let declared = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let actual = frame.len() - HEADER_LEN;
    if declared != actual {
        return Err(Error::Protocol(format!(
            "length prefix {declared} does not match body length {actual}"
        )));
    }
    if declared > MAX_BODY_LEN {
        return Err(Error::Protocol(format!("frame body too large: {declared}")));
    }
    Ok((frame[HEADER_LEN], &frame[HEADER_LEN + 1..]))
}

/// Decode a command frame back into a [`Command`].
pub fn decode_command(frame: &[u8]) -> Result<Command> {
    let body = match split_frame(frame)? {
        (KIND_COMMAND, body) => body,
        (kind, _) => {
            return Err(Error::Protocol(format!(
                "expected command frame, got kind 0x{kind:02X}"
            )));
        }
    };
    let Some((&opcode, params)) = body.split_first() else {
        return Err(Error::Protocol("command frame without opcode".into()));
    };

    let expect_empty = |command: Command| -> Result<Command> {
        if params.is_empty() {
            Ok(command)
        } else {
            Err(Error::Protocol(format!(
                "unexpected parameters for {}",
                command.name()
            )))
        }
    };

    match opcode {
        OP_HELLO => expect_empty(Command::Hello),
        OP_IDENTIFY => expect_empty(Command::Identify),
        OP_CONFIGURE => expect_empty(Command::Configure),
        OP_STREAM_START => expect_empty(Command::StreamStart),
        OP_STREAM_STOP => expect_empty(Command::StreamStop),
        OP_SET_FREQUENCY => {
            if params.len() != 12 {
                return Err(Error::Protocol(format!(
                    "set_frequency expects 12 parameter bytes, got {}",
                    params.len()
                )));
            }
            let channel = u32::from_be_bytes([params[0], params[1], params[2], params[3]]);
            let mut hz = [0u8; 8];
            hz.copy_from_slice(&params[4..12]);
            Ok(Command::SetFrequency {
                channel: TunerChannel(channel),
                frequency_hz: u64::from_be_bytes(hz),
            })
        }
        other => Err(Error::Protocol(format!("unknown opcode 0x{other:02X}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
