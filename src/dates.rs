// SPDX-License-Identifier: MIT OR Apache-2.0

//! Packed-date helpers for ISPF statistics, tape labels and the XMI
//! origin timestamp.
//!
//! All three produce ISO-8601 strings with microseconds. Malformed input
//! yields an empty string (or `None` for the origin timestamp): a bad
//! date never aborts a parse.

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;

const ISO_MICRO: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Decode an ISPF packed date: a century byte (0 = 1900s), a BCD year
/// byte, a three-nibble BCD day-of-year, and optionally BCD hours and
/// minutes. Seconds arrive separately (also BCD), from the byte the
/// directory entry stores next to the flags.
pub fn ispf_date(packed: &[u8], seconds: u8) -> String {
    if packed.len() < 4 {
        return String::new();
    }

    let century = 19 + u32::from(packed[0]);
    let year_digits = format!("{:02x}", packed[1]);
    let mut day_digits = format!("{:02x}{:x}", packed[2], packed[3] >> 4);
    if day_digits == "000" {
        day_digits = "001".to_string();
    }
    let (hour_digits, minute_digits) = if packed.len() >= 6 {
        (format!("{:02x}", packed[4]), format!("{:02x}", packed[5]))
    } else {
        ("00".to_string(), "00".to_string())
    };
    let second_digits = if seconds != 0 {
        format!("{seconds:02x}")
    } else {
        "00".to_string()
    };

    let parsed = (|| {
        let year: i32 = format!("{century}{year_digits}").parse().ok()?;
        let day: u32 = day_digits.parse().ok()?;
        let hour: u32 = hour_digits.parse().ok()?;
        let minute: u32 = minute_digits.parse().ok()?;
        let second: u32 = second_digits.parse().ok()?;
        NaiveDate::from_yo_opt(year, day)?.and_hms_opt(hour, minute, second)
    })();

    match parsed {
        Some(dt) => dt.format(ISO_MICRO).to_string(),
        None => {
            debug!("cannot parse ISPF date field ({century}{year_digits}{day_digits})");
            String::new()
        }
    }
}

/// Decode a tape-label `cyyddd` date. A blank century means 1900s,
/// otherwise the digit is added to 20 (0 = 2000s). A trailing `0` day
/// digit is coerced to `1`, which also maps day `000` to `001`.
pub fn tape_date(label_date: &str) -> String {
    let chars: Vec<char> = label_date.chars().collect();
    if chars.len() < 6 {
        return String::new();
    }

    let century = match chars[0] {
        ' ' => 19,
        c => match c.to_digit(10) {
            Some(n) => 20 + n,
            None => return String::new(),
        },
    };
    let mut digits: Vec<char> = chars[1..6].to_vec();
    if digits[4] == '0' {
        digits[4] = '1';
    }

    let parsed = (|| {
        let year_digits: String = digits[..2].iter().collect();
        let day_digits: String = digits[2..5].iter().collect();
        let year: i32 = format!("{century}{year_digits}").parse().ok()?;
        let day: u32 = day_digits.parse().ok()?;
        NaiveDate::from_yo_opt(year, day)?.and_hms_opt(0, 0, 0)
    })();

    match parsed {
        Some(dt) => dt.format(ISO_MICRO).to_string(),
        None => {
            debug!("cannot parse tape label date {label_date:?}");
            String::new()
        }
    }
}

/// Normalize an INMFTIME value (`YYYYMMDDHHMMSS` plus up to six digits
/// of microseconds, right-padded with zeros) to ISO-8601.
pub fn transmit_time(raw: &str) -> Option<NaiveDateTime> {
    let padded = format!("{raw:0<20}");
    if !padded.is_char_boundary(20) || !padded[..20].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = |a: usize, b: usize| padded[a..b].parse::<u32>().ok();
    let year: i32 = padded[..4].parse().ok()?;
    NaiveDate::from_ymd_opt(year, field(4, 6)?, field(6, 8)?)?.and_hms_micro_opt(
        field(8, 10)?,
        field(10, 12)?,
        field(12, 14)?,
        field(14, 20)?,
    )
}

/// Render a datetime the way every date in the model is rendered.
pub fn iso_micro(dt: &NaiveDateTime) -> String {
    dt.format(ISO_MICRO).to_string()
}
