use bytes::{Buf, BufMut, BytesMut};
use chrono::Utc;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, Position};

/// Size of a goto telegram sent by Stellarium
pub const GOTO_LEN: usize = 20;

/// Size of a position telegram sent to Stellarium
pub const POSITION_LEN: usize = 24;

/// Goto request from the planetarium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GotoTelegram {
    pub length: i16,
    pub kind: i16,
    /// Client clock, milliseconds
    pub timestamp: u64,
    pub ra_raw: u32,
    pub dec_raw: i32,
}

/// Current pointing reported to the planetarium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionTelegram {
    /// Server clock, milliseconds
    pub timestamp: u64,
    pub ra_raw: u32,
    pub dec_raw: i32,
}

impl PositionTelegram {
    /// Creates a new position telegram with an explicit millisecond timestamp
    pub fn new(position: Position, timestamp: u64) -> Self {
        PositionTelegram {
            timestamp,
            ra_raw: position.ra_raw,
            dec_raw: position.dec_raw,
        }
    }

    /// Stamps a position with the current time
    pub fn now(position: Position) -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        Self::new(position, millis)
    }
}

/// Little-endian Stellarium telescope protocol codec.
///
/// Each call to `decode` receives the bytes of one read. A read of any
/// length other than a goto telegram is discarded as malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelegramCodec;

impl TelegramCodec {
    /// Creates a new telegram codec
    pub fn new() -> Self {
        TelegramCodec
    }
}

impl Decoder for TelegramCodec {
    type Item = GotoTelegram;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.len() {
            0 => Ok(None),
            GOTO_LEN => Ok(Some(GotoTelegram {
                length: src.get_i16_le(),
                kind: src.get_i16_le(),
                timestamp: src.get_u64_le(),
                ra_raw: src.get_u32_le(),
                dec_raw: src.get_i32_le(),
            })),
            len => {
                src.clear();
                Err(Error::MalformedTelegram(len))
            }
        }
    }
}

impl Encoder<PositionTelegram> for TelegramCodec {
    type Error = Error;

    fn encode(&mut self, item: PositionTelegram, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(POSITION_LEN);
        dst.put_i16_le(POSITION_LEN as i16);
        dst.put_i16_le(0);
        dst.put_u64_le(item.timestamp);
        dst.put_u32_le(item.ra_raw);
        dst.put_i32_le(item.dec_raw);
        // status
        dst.put_i32_le(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::goto_bytes;

    #[test]
    fn test_decode_goto() {
        let mut codec = TelegramCodec::new();
        let mut src = BytesMut::from(&goto_bytes(0x8000_0000, 0x4000_0000)[..]);

        let telegram = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(telegram.length, 20);
        assert_eq!(telegram.kind, 0);
        assert_eq!(telegram.timestamp, 1_700_000_000_000);
        assert_eq!(telegram.ra_raw, 0x8000_0000);
        assert_eq!(telegram.dec_raw, 0x4000_0000);
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_negative_declination() {
        let mut codec = TelegramCodec::new();
        let mut src = BytesMut::from(&goto_bytes(0, -0x4000_0000)[..]);
        assert_eq!(codec.decode(&mut src).unwrap().unwrap().dec_raw, -0x4000_0000);
    }

    #[test]
    fn test_wrong_length_is_malformed() {
        let mut codec = TelegramCodec::new();
        let mut src = BytesMut::from(&[0u8; 13][..]);

        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, Error::MalformedTelegram(13)));
        assert!(src.is_empty());

        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_encode_position() {
        let mut codec = TelegramCodec::new();
        let mut dst = BytesMut::new();
        let position = Position { ra_raw: 0x8000_0000, dec_raw: -0x2000_0000 };

        codec.encode(PositionTelegram::new(position, 42), &mut dst).unwrap();

        assert_eq!(dst.len(), POSITION_LEN);
        assert_eq!(&dst[0..2], &24i16.to_le_bytes());
        assert_eq!(&dst[2..4], &[0, 0]);
        assert_eq!(&dst[4..12], &42u64.to_le_bytes());
        assert_eq!(&dst[12..16], &0x8000_0000u32.to_le_bytes());
        assert_eq!(&dst[16..20], &(-0x2000_0000i32).to_le_bytes());
        assert_eq!(&dst[20..24], &[0, 0, 0, 0]);
    }
}
