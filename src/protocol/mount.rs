use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::coords;
use crate::core::{AlignmentSide, Error, Position, Result, UNAVAILABLE};
use crate::serial::SerialLink;
use crate::sink::MessageSink;

/// Positive acknowledgement byte
pub const ACK: u8 = 0x8F;

/// Negative acknowledgement byte
pub const NACK: u8 = 0xA5;

/// Marks the start of an asynchronous notification
pub const ASYNC_DELIMITER: u8 = 0x9F;

/// Terminates a reply
pub const TERMINATOR: u8 = b';';

/// Text the controller embeds in replies when it failed internally
const INTERNAL_ERROR: &str = "Internal error";

/// Prefix of periodic controller notifications that are not worth logging
const STATUS_CHATTER: &str = "O7";

/// Telescope readouts, in sweep order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountField {
    AlignmentState,
    AlignmentSide,
    CurrentRa,
    CurrentDec,
    TargetRa,
    TargetDec,
}

impl MountField {
    /// All fields in the order a sweep queries them
    pub const ALL: [MountField; 6] = [
        MountField::AlignmentState,
        MountField::AlignmentSide,
        MountField::CurrentRa,
        MountField::CurrentDec,
        MountField::TargetRa,
        MountField::TargetDec,
    ];

    /// Query opcode, without framing
    pub fn opcode(&self) -> &'static str {
        match self {
            MountField::AlignmentState => "AGas",
            MountField::AlignmentSide => "AGai",
            MountField::CurrentRa => "CGra",
            MountField::CurrentDec => "CGde",
            MountField::TargetRa => "CGtr",
            MountField::TargetDec => "CGtd",
        }
    }

    /// Display name
    pub fn label(&self) -> &'static str {
        match self {
            MountField::AlignmentState => "Alignment state",
            MountField::AlignmentSide => "Alignment side",
            MountField::CurrentRa => "Current right ascension",
            MountField::CurrentDec => "Current declination",
            MountField::TargetRa => "Target right ascension",
            MountField::TargetDec => "Target declination",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Last decoded value of every mount field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountFields {
    values: [String; 6],
}

impl Default for MountFields {
    fn default() -> Self {
        MountFields {
            values: std::array::from_fn(|_| UNAVAILABLE.to_string()),
        }
    }
}

impl MountFields {
    /// Returns the last value of `field`
    pub fn get(&self, field: MountField) -> &str {
        &self.values[field.index()]
    }

    /// Replaces the value of `field`
    pub fn set(&mut self, field: MountField, value: impl Into<String>) {
        self.values[field.index()] = value.into();
    }

    /// Marks every field unavailable
    pub fn reset(&mut self) {
        *self = MountFields::default();
    }

    /// Values in sweep order
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    /// Fields paired with their values, in sweep order
    pub fn iter(&self) -> impl Iterator<Item = (MountField, &str)> {
        MountField::ALL.into_iter().zip(self.values())
    }

    /// Current pointing, when both current RA and Dec decode
    pub fn position(&self) -> Option<Position> {
        let ra_raw = coords::ra_to_raw(self.get(MountField::CurrentRa)).ok()?;
        let dec_raw = coords::dec_to_raw(self.get(MountField::CurrentDec)).ok()?;
        Some(Position { ra_raw, dec_raw })
    }
}

/// Classified reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack,
    Value(String),
    Unavailable,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ack => f.write_str("ATCL_ACK"),
            Reply::Nack => f.write_str("ATCL_NACK"),
            Reply::Value(value) => f.write_str(value),
            Reply::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

/// A reply split from the notifications that arrived with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReply {
    pub reply: Reply,
    /// Out-of-band notifications, in arrival order
    pub messages: Vec<String>,
}

/// Wraps an opcode as `!opcode;`
pub fn frame(opcode: &str) -> String {
    format!("!{};", opcode)
}

/// Decodes the raw bytes returned for one command.
///
/// The reply precedes the first notification delimiter; every non-empty
/// segment after it is a notification.
pub fn decode_reply(raw: &[u8]) -> DecodedReply {
    let mut segments = raw.split(|&b| b == ASYNC_DELIMITER);
    let head = trim_ascii(segments.next().unwrap_or_default());

    let mut messages: Vec<String> = segments
        .map(trim_ascii)
        .filter(|segment| !segment.is_empty())
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .filter(|message| !message.starts_with(STATUS_CHATTER))
        .collect();

    let reply = match head.first() {
        None => Reply::Unavailable,
        Some(&ACK) => Reply::Ack,
        Some(&NACK) => Reply::Nack,
        Some(_) => {
            let body = head.strip_suffix(&[TERMINATOR]).unwrap_or(head);
            let text = String::from_utf8_lossy(body).into_owned();
            if text.contains(INTERNAL_ERROR) {
                messages.push(text);
                Reply::Unavailable
            } else if text.is_empty() {
                Reply::Unavailable
            } else {
                Reply::Value(text)
            }
        }
    };

    DecodedReply { reply, messages }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// ATCL command builder and field poller for the mount controller
pub struct MountProtocol {
    link: SerialLink,
    fields: MountFields,
    sink: Arc<dyn MessageSink>,
}

impl MountProtocol {
    /// Creates a new mount protocol over `link` with an empty field table
    pub fn new(link: SerialLink, sink: Arc<dyn MessageSink>) -> Self {
        MountProtocol {
            link,
            fields: MountFields::default(),
            sink,
        }
    }

    /// Returns the underlying serial link
    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    /// Returns the field table from the last sweep
    pub fn fields(&self) -> &MountFields {
        &self.fields
    }

    /// Queries all six fields in order and returns the resulting table.
    ///
    /// On any link error every field is reset to unavailable so the table
    /// never mixes two sweeps.
    pub fn poll(&mut self) -> Result<MountFields> {
        for field in MountField::ALL {
            let raw = match self.link.exchange(frame(field.opcode()).as_bytes()) {
                Ok(raw) => raw,
                Err(e) => {
                    self.fields.reset();
                    if matches!(e, Error::LinkFailure(_)) {
                        self.sink.message("Something is wrong. Closing serial connection to telescope.");
                    }
                    return Err(e);
                }
            };

            let decoded = decode_reply(&raw);
            self.surface(&decoded.messages);
            self.fields.set(field, decoded.reply.to_string());
        }

        debug!(fields = ?self.fields, "mount sweep complete");
        Ok(self.fields.clone())
    }

    /// Sends `!ASas<side>;`
    pub fn set_alignment_side(&mut self, side: AlignmentSide) -> Result<Reply> {
        self.command(&format!("ASas{}", side))
    }

    /// Sends `!CStr<ra>;`
    pub fn set_target_ra(&mut self, ra: &str) -> Result<Reply> {
        self.command(&format!("CStr{}", non_blank(ra)?))
    }

    /// Sends `!CStd<dec>;`
    pub fn set_target_dec(&mut self, dec: &str) -> Result<Reply> {
        self.command(&format!("CStd{}", non_blank(dec)?))
    }

    /// Sends `!AFrn;`
    pub fn align_from_target(&mut self) -> Result<Reply> {
        self.command("AFrn")
    }

    /// Sends `!GTrd;`
    pub fn go_to_target(&mut self) -> Result<Reply> {
        self.command("GTrd")
    }

    /// Sends `!AVoi;`
    pub fn void_alignment(&mut self) -> Result<Reply> {
        self.command("AVoi")
    }

    /// Sends `!GTol;`
    pub fn return_to_previous_alignment(&mut self) -> Result<Reply> {
        self.command("GTol")
    }

    /// Frames and sends an arbitrary opcode
    pub fn send_raw(&mut self, opcode: &str) -> Result<Reply> {
        self.command(non_blank(opcode)?)
    }

    fn command(&mut self, opcode: &str) -> Result<Reply> {
        let frame = frame(opcode);
        let raw = match self.link.exchange(frame.as_bytes()) {
            Ok(raw) => raw,
            Err(e) => {
                match &e {
                    Error::LinkUnavailable(_) => {
                        self.sink.message("Did NOT send data to telescope (port not open).")
                    }
                    _ => self.sink.message("Something is wrong. Closing serial connection to telescope."),
                }
                return Err(e);
            }
        };

        self.sink.message(&format!("Sent '{}' to telescope.", frame));
        self.sink.message(&format!("Raw reply: '{}'", raw.escape_ascii()));
        let decoded = decode_reply(&raw);
        self.surface(&decoded.messages);
        self.sink.message(&format!("Received: {}.", decoded.reply));

        if decoded.reply == Reply::Nack {
            let err = Error::nack(frame);
            warn!(error = %err, "mount returned NACK");
            self.sink.message(&err.to_string());
        }

        Ok(decoded.reply)
    }

    fn surface(&self, messages: &[String]) {
        for message in messages {
            self.sink.message(message);
        }
    }
}

fn non_blank(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(Error::command("Did not receive user input."))
    } else {
        Ok(trimmed)
    }
}
