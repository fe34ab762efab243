//! Conversions between raw telescope-protocol angles and sexagesimal strings
//!
//! Right ascension is carried as an unsigned 32-bit turn fraction
//! (`0x80000000` = 12h) and declination as a signed 32-bit quarter-turn
//! fraction (`0x40000000` = +90°). Strings use the `H:M:S.s` and `±D:M:S.s`
//! grammar the mount accepts, without zero padding.

use std::borrow::Cow;

use crate::core::{Error, Result};

/// Raw units per 12 hours of right ascension
const RA_HALF_TURN: f64 = 2_147_483_648.0;

/// Raw units per 90 degrees of declination
const DEC_QUARTER_TURN: f64 = 1_073_741_824.0;

/// Full u32 range, used to wrap 24h back onto 0h
const RA_FULL_TURN: u64 = 1 << 32;

/// Formats a raw right ascension as `H:M:S.s`
pub fn raw_to_ra(raw: u32) -> String {
    let hours = raw as f64 / RA_HALF_TURN * 12.0;
    let (h, m, s) = split_sexagesimal(hours);
    format!("{}:{}:{:.1}", h, m, s)
}

/// Formats a raw declination as `±D:M:S.s`
pub fn raw_to_dec(raw: i32) -> String {
    let degrees = raw as f64 / DEC_QUARTER_TURN * 90.0;
    let sign = if degrees < 0.0 { '-' } else { '+' };
    let (d, m, s) = split_sexagesimal(degrees.abs());
    format!("{}{}:{}:{:.1}", sign, d, m, s)
}

/// Parses `H:M:S.s` into a raw right ascension
pub fn ra_to_raw(text: &str) -> Result<u32> {
    let (negative, hours) = parse_sexagesimal(text)?;
    if negative || hours > 24.0 {
        return Err(Error::coordinate(format!("right ascension out of range: {}", text)));
    }

    let raw = (hours / 12.0 * RA_HALF_TURN).round() as u64 % RA_FULL_TURN;
    Ok(raw as u32)
}

/// Parses `±D:M:S.s` into a raw declination
pub fn dec_to_raw(text: &str) -> Result<i32> {
    let (negative, degrees) = parse_sexagesimal(text)?;
    if degrees > 90.0 {
        return Err(Error::coordinate(format!("declination out of range: {}", text)));
    }

    let signed = if negative { -degrees } else { degrees };
    Ok((signed / 90.0 * DEC_QUARTER_TURN).round() as i32)
}

/// Rewrites a seconds field of exactly `60` as `59`, keeping any fraction.
///
/// The mount refuses a 60-seconds literal, which the one-decimal
/// decomposition can produce. Returns `Cow::Owned` only when it rewrote.
pub fn normalize_dec_seconds(dec: &str) -> Cow<'_, str> {
    if let Some(idx) = dec.rfind(':') {
        let seconds = &dec[idx + 1..];
        let whole = seconds.split('.').next().unwrap_or_default();
        if whole == "60" {
            return Cow::Owned(format!("{}59{}", &dec[..=idx], &seconds[2..]));
        }
    }
    Cow::Borrowed(dec)
}

fn split_sexagesimal(value: f64) -> (u32, u32, f64) {
    let whole = value.trunc();
    let minutes = (value - whole) * 60.0;
    let m = minutes.trunc();
    let seconds = (minutes - m) * 60.0;
    (whole as u32, m as u32, seconds)
}

fn parse_sexagesimal(text: &str) -> Result<(bool, f64)> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() != 3 {
        return Err(Error::coordinate(format!("expected three fields in {:?}", text)));
    }

    let mut fields = [0f64; 3];
    for (field, part) in fields.iter_mut().zip(&parts) {
        *field = part
            .parse::<f64>()
            .map_err(|_| Error::coordinate(format!("bad field {:?} in {:?}", part, text)))?;
        if !field.is_finite() || *field < 0.0 {
            return Err(Error::coordinate(format!("bad field {:?} in {:?}", part, text)));
        }
    }

    let [whole, minutes, seconds] = fields;
    if minutes > 60.0 || seconds > 60.0 {
        return Err(Error::coordinate(format!("minutes or seconds out of range in {:?}", text)));
    }

    Ok((negative, whole + minutes / 60.0 + seconds / 3600.0))
}
