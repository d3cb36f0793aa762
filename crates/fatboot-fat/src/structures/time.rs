//! FAT timestamp encoding.
//!
//! Dates pack as `(year - 1980) << 9 | month << 5 | day`, times as
//! `hour << 11 | minute << 5 | second / 2`; the odd second and
//! sub-second resolution live in a separate 10 ms-unit byte used only for
//! creation times. Valid timestamps span 1980-01-01 up to (but not
//! including) 2100-01-01.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::{FatError, Result};

/// Encodes *ts* as `(date, time, tenth_ms)` fields.
pub fn encode_timestamp(ts: NaiveDateTime) -> Result<(u16, u16, u8)> {
    let year = ts.year();
    if !(1980..2100).contains(&year) {
        return Err(FatError::InvalidValue(format!(
            "timestamp {ts} outside the representable range"
        )));
    }
    let date = (((year - 1980) as u16) << 9) | ((ts.month() as u16) << 5) | ts.day() as u16;
    let time =
        ((ts.hour() as u16) << 11) | ((ts.minute() as u16) << 5) | (ts.second() as u16 / 2);
    let ms = ((ts.second() % 2) * 100 + ts.nanosecond() / 10_000_000) as u8;
    Ok((date, time, ms))
}

/// Decodes `(date, time, tenth_ms)` fields; `None` for out-of-range
/// values (including the all-zero timestamps FAT uses for "unset").
pub fn decode_timestamp(date: u16, time: u16, ms: u8) -> Option<NaiveDateTime> {
    let year = 1980 + (date >> 9) as i32;
    let month = (date >> 5) as u32 & 0x0F;
    let day = date as u32 & 0x1F;
    let hour = (time >> 11) as u32;
    let minute = (time >> 5) as u32 & 0x3F;
    let second = (time as u32 & 0x1F) * 2 + ms as u32 / 100;
    let millis = (ms as u32 % 100) * 10;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_milli_opt(hour, minute, second, millis)
}

/// Decodes a bare date field (access dates carry no time of day).
pub fn decode_date(date: u16) -> Option<NaiveDateTime> {
    decode_timestamp(date, 0, 0)
}
