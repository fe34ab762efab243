//! Device and client wire protocols
//!
//! This module defines the mount's ATCL command set, the RoboFocus
//! checksummed frames, and the Stellarium binary telegrams.

mod focuser;
mod mount;
mod telegram;

pub use self::focuser::{
    build_frame, checksum, decode_frames, DecodedFrames, FocuserField, FocuserFields,
    FocuserProtocol, MAX_STEPS,
};
pub use self::mount::{
    decode_reply, frame, DecodedReply, MountField, MountFields, MountProtocol, Reply, ACK,
    ASYNC_DELIMITER, NACK,
};
pub use self::telegram::{GotoTelegram, PositionTelegram, TelegramCodec, GOTO_LEN, POSITION_LEN};
