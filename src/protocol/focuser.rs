use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::core::{Error, Result, UNAVAILABLE};
use crate::serial::SerialLink;
use crate::sink::MessageSink;

/// ASCII characters in one frame, excluding the checksum byte
pub const FRAME_LEN: usize = 8;

/// Largest step count a move frame can carry
pub const MAX_STEPS: u32 = 999_999;

/// Bytes the focuser emits while the motor turns in or out
const MOTION_MARKERS: [u8; 2] = [b'I', b'O'];

/// Focuser readouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocuserField {
    Version,
    Position,
}

impl FocuserField {
    pub const ALL: [FocuserField; 2] = [FocuserField::Version, FocuserField::Position];

    /// Two-character frame tag
    pub fn tag(&self) -> &'static str {
        match self {
            FocuserField::Version => "FV",
            FocuserField::Position => "FD",
        }
    }

    /// Display name
    pub fn label(&self) -> &'static str {
        match self {
            FocuserField::Version => "Version",
            FocuserField::Position => "Position",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.tag().as_bytes() == tag)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Last decoded value of every focuser field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocuserFields {
    values: [String; 2],
}

impl Default for FocuserFields {
    fn default() -> Self {
        FocuserFields {
            values: std::array::from_fn(|_| UNAVAILABLE.to_string()),
        }
    }
}

impl FocuserFields {
    /// Returns the last value of `field`
    pub fn get(&self, field: FocuserField) -> &str {
        &self.values[field.index()]
    }

    /// Replaces the value of `field`
    pub fn set(&mut self, field: FocuserField, value: impl Into<String>) {
        self.values[field.index()] = value.into();
    }

    /// Marks every field unavailable
    pub fn reset(&mut self) {
        *self = FocuserFields::default();
    }

    /// Fields paired with their values
    pub fn iter(&self) -> impl Iterator<Item = (FocuserField, &str)> {
        FocuserField::ALL
            .into_iter()
            .zip(self.values.iter().map(String::as_str))
    }
}

/// Result of decoding a run of focuser bytes
#[derive(Debug, Default)]
pub struct DecodedFrames {
    /// Recognized fields with their stripped values, in stream order
    pub fields: Vec<(FocuserField, String)>,
    /// Every frame that passed its checksum, concatenated
    pub text: String,
    /// One entry per frame dropped for a bad checksum
    pub errors: Vec<Error>,
    /// Trailing bytes too short to form a frame
    pub remainder: Vec<u8>,
}

/// Sum of the bytes modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Appends the checksum to an 8-character command
pub fn build_frame(command: &str) -> Result<Vec<u8>> {
    if command.len() != FRAME_LEN || !command.is_ascii() {
        return Err(Error::command(format!(
            "Focuser command must be {} ASCII characters: {:?}",
            FRAME_LEN, command
        )));
    }

    let mut frame = command.as_bytes().to_vec();
    frame.push(checksum(command.as_bytes()));
    Ok(frame)
}

/// Splits a byte stream into checksummed frames.
///
/// Motion marker bytes are skipped wherever a frame could start. Frames
/// that fail their checksum are reported in `errors` and skipped.
pub fn decode_frames(bytes: &[u8]) -> DecodedFrames {
    let mut decoded = DecodedFrames::default();
    let mut rest = bytes;

    loop {
        while let Some((first, tail)) = rest.split_first() {
            if !MOTION_MARKERS.contains(first) {
                break;
            }
            rest = tail;
        }

        if rest.len() <= FRAME_LEN {
            break;
        }

        let (frame, tail) = rest.split_at(FRAME_LEN + 1);
        let (body, actual) = (&frame[..FRAME_LEN], frame[FRAME_LEN]);
        let expected = checksum(body);

        if expected == actual {
            decoded.text.push_str(&String::from_utf8_lossy(body));
            if let Some(field) = FocuserField::from_tag(&body[..2]) {
                decoded.fields.push((field, strip_zeros(&body[2..])));
            }
        } else {
            decoded.errors.push(Error::ChecksumMismatch { expected, actual });
        }

        rest = tail;
    }

    decoded.remainder = rest.to_vec();
    decoded
}

fn strip_zeros(value: &[u8]) -> String {
    let text = String::from_utf8_lossy(value);
    match text.trim_start_matches('0') {
        "" => "0".to_string(),
        stripped => stripped.to_string(),
    }
}

/// RoboFocus command builder and readout decoder
pub struct FocuserProtocol {
    link: SerialLink,
    fields: FocuserFields,
    /// Partial frame carried over to the next read
    remainder: Vec<u8>,
    sink: Arc<dyn MessageSink>,
}

impl FocuserProtocol {
    /// Creates a new focuser protocol over `link` with an empty field table
    pub fn new(link: SerialLink, sink: Arc<dyn MessageSink>) -> Self {
        FocuserProtocol {
            link,
            fields: FocuserFields::default(),
            remainder: Vec::new(),
            sink,
        }
    }

    /// Returns the underlying serial link
    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    /// Returns the decoded field table
    pub fn fields(&self) -> &FocuserFields {
        &self.fields
    }

    /// Asks for the firmware version and decodes the answer
    pub fn get_version(&mut self) -> Result<String> {
        self.send("FV000000")?;
        let settle = self.link.settle();
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        let text = self.read()?;
        self.sink.message(&format!("Read '{}' from RoboFocus.", text));
        Ok(text)
    }

    /// Decodes whatever the focuser has sent since the last read
    pub fn poll(&mut self) -> Result<FocuserFields> {
        self.read()?;
        Ok(self.fields.clone())
    }

    /// Moves out for non-negative counts, in for negative ones
    pub fn move_by(&mut self, steps: i32) -> Result<()> {
        if steps >= 0 {
            self.move_out(steps.unsigned_abs())
        } else {
            self.move_in(steps.unsigned_abs())
        }
    }

    /// Sends `FI<steps>`
    pub fn move_in(&mut self, steps: u32) -> Result<()> {
        self.send(&format!("FI{:06}", check_steps(steps)?))
    }

    /// Sends `FO<steps>`
    pub fn move_out(&mut self, steps: u32) -> Result<()> {
        self.send(&format!("FO{:06}", check_steps(steps)?))
    }

    fn send(&mut self, command: &str) -> Result<()> {
        let frame = build_frame(command)?;
        self.remainder.clear();
        match self.link.send(&frame) {
            Ok(()) => {
                self.sink.message(&format!("Sent '{}' to RoboFocus.", command));
                Ok(())
            }
            Err(e) => Err(self.link_error(e)),
        }
    }

    fn read(&mut self) -> Result<String> {
        let bytes = match self.link.receive() {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.link_error(e)),
        };

        let mut stream = std::mem::take(&mut self.remainder);
        stream.extend_from_slice(&bytes);

        let decoded = decode_frames(&stream);
        for err in &decoded.errors {
            warn!(error = %err, "focuser frame dropped");
            self.sink.message(&err.to_string());
        }
        for (field, value) in decoded.fields {
            self.fields.set(field, value);
        }
        self.remainder = decoded.remainder;

        debug!(frames = %decoded.text, "focuser read complete");
        Ok(decoded.text)
    }

    fn link_error(&mut self, e: Error) -> Error {
        self.fields.reset();
        self.remainder.clear();
        if matches!(e, Error::LinkFailure(_)) {
            self.sink.message("Something is wrong. Closing serial connection to RoboFocus.");
        }
        e
    }
}

fn check_steps(steps: u32) -> Result<u32> {
    if steps > MAX_STEPS {
        Err(Error::command(format!(
            "Focuser move of {} steps exceeds {}",
            steps, MAX_STEPS
        )))
    } else {
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::scripted_focuser;

    fn framed(command: &str) -> Vec<u8> {
        build_frame(command).unwrap()
    }

    #[test]
    fn test_frame_checksum() {
        let frame = framed("FV000000");
        assert_eq!(frame.len(), 9);
        let expected = (b'F' as u32 + b'V' as u32 + 6 * b'0' as u32) % 256;
        assert_eq!(frame[8] as u32, expected);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_build_frame_rejects_bad_length() {
        assert!(build_frame("FV00").is_err());
        assert!(build_frame("FV0000000").is_err());
    }

    #[test]
    fn test_decode_version_frame() {
        let decoded = decode_frames(&framed("FV003300"));
        assert_eq!(decoded.fields, vec![(FocuserField::Version, "3300".to_string())]);
        assert_eq!(decoded.text, "FV003300");
        assert!(decoded.errors.is_empty());
        assert!(decoded.remainder.is_empty());
    }

    #[test]
    fn test_motion_markers_are_skipped() {
        let mut stream = b"IIII".to_vec();
        stream.extend(framed("FD002000"));
        stream.extend_from_slice(b"OO");
        stream.extend(framed("FD001500"));

        let decoded = decode_frames(&stream);
        assert_eq!(
            decoded.fields,
            vec![
                (FocuserField::Position, "2000".to_string()),
                (FocuserField::Position, "1500".to_string()),
            ]
        );
        assert_eq!(decoded.text, "FD002000FD001500");
    }

    #[test]
    fn test_corrupted_frame_is_dropped() {
        let mut stream = framed("FD002000");
        stream[8] = stream[8].wrapping_add(1);
        stream.extend(framed("FV000042"));

        let decoded = decode_frames(&stream);
        assert_eq!(decoded.fields, vec![(FocuserField::Version, "42".to_string())]);
        assert_eq!(decoded.errors.len(), 1);
        assert!(decoded.errors[0].to_string().starts_with("Checksum did not match"));
    }

    #[test]
    fn test_short_tail_is_remainder() {
        let mut stream = framed("FD000010");
        stream.extend_from_slice(b"FD00");

        let decoded = decode_frames(&stream);
        assert_eq!(decoded.fields.len(), 1);
        assert_eq!(decoded.remainder, b"FD00");
    }

    #[test]
    fn test_unknown_tag_and_zero_value() {
        let mut stream = framed("FX123456");
        stream.extend(framed("FD000000"));

        let decoded = decode_frames(&stream);
        assert_eq!(decoded.text, "FX123456FD000000");
        assert_eq!(decoded.fields, vec![(FocuserField::Position, "0".to_string())]);
    }

    #[test]
    fn test_poll_keeps_field_on_bad_checksum() {
        let (mut focuser, handle, sink) = scripted_focuser();
        handle.push_input(&framed("FD002000"));
        focuser.poll().unwrap();
        assert_eq!(focuser.fields().get(FocuserField::Position), "2000");

        let mut corrupted = framed("FD009999");
        corrupted[8] ^= 0x55;
        handle.push_input(&corrupted);

        let fields = focuser.poll().unwrap();
        assert_eq!(fields.get(FocuserField::Position), "2000");
        assert!(sink.has_message("Checksum did not match"));
    }

    #[test]
    fn test_poll_joins_split_frames() {
        let (mut focuser, handle, _sink) = scripted_focuser();
        let frame = framed("FD000777");
        handle.push_input(&frame[..5]);
        focuser.poll().unwrap();
        assert_eq!(focuser.fields().get(FocuserField::Position), "N/A");

        handle.push_input(&frame[5..]);
        focuser.poll().unwrap();
        assert_eq!(focuser.fields().get(FocuserField::Position), "777");
    }

    #[test]
    fn test_get_version() {
        let (mut focuser, handle, sink) = scripted_focuser();
        let reply = framed("FV003300");
        handle.set_responder(move |_| reply.clone());

        assert_eq!(focuser.get_version().unwrap(), "FV003300");
        assert_eq!(handle.written(), vec![framed("FV000000")]);
        assert_eq!(focuser.fields().get(FocuserField::Version), "3300");
        assert!(sink.has_message("Sent 'FV000000' to RoboFocus."));
        assert!(sink.has_message("Read 'FV003300' from RoboFocus."));
    }

    #[test]
    fn test_move_direction_follows_sign() {
        let (mut focuser, handle, _sink) = scripted_focuser();
        focuser.move_by(120).unwrap();
        focuser.move_by(-45).unwrap();
        focuser.move_by(0).unwrap();

        assert_eq!(
            handle.written(),
            vec![framed("FO000120"), framed("FI000045"), framed("FO000000")]
        );
    }

    #[test]
    fn test_move_rejects_large_magnitude() {
        let (mut focuser, handle, _sink) = scripted_focuser();
        assert!(matches!(focuser.move_by(1_000_000), Err(Error::InvalidCommand(_))));
        assert!(matches!(focuser.move_by(i32::MIN), Err(Error::InvalidCommand(_))));
        assert!(handle.written().is_empty());
    }

    #[test]
    fn test_closed_link_marks_fields_unavailable() {
        let (mut focuser, handle, _sink) = scripted_focuser();
        handle.push_input(&framed("FD002000"));
        focuser.poll().unwrap();

        focuser.link().close();
        assert!(matches!(focuser.poll(), Err(Error::LinkUnavailable(_))));
        assert_eq!(focuser.fields(), &FocuserFields::default());
    }
}
