use std::time::Duration;

use chrono::{Datelike, Months, NaiveDateTime};

use crate::error::{Error, Result};

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Three-letter English abbreviation for a 1-based month number.
///
/// Months outside 1..=12 wrap around, so `threeletters(13)` is `"Jan"`.
pub fn threeletters(month: i64) -> String {
    let idx = (month - 1).rem_euclid(12) as usize;
    MONTH_ABBREVIATIONS[idx].to_string()
}

/// 1-based month number for a three-letter abbreviation (case-insensitive).
pub fn month_number(abbr: &str) -> Option<u32> {
    MONTH_ABBREVIATIONS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(abbr.trim()))
        .map(|i| i as u32 + 1)
}

/// Whole months to add to the issue month for a fractional lead.
///
/// Leads are centred on the middle of a month: lead 0.5 is the issue month
/// itself, 1.5 is the following month.
fn lead_offset(lead: f64) -> Result<u32> {
    if !lead.is_finite() || lead < 0.0 {
        return Err(Error::Template(format!("invalid lead time: {lead}")));
    }
    Ok(lead.floor() as u32)
}

/// Target season name for a forecast issued at `fdate` with the given leads,
/// e.g. issue 2022-05 with leads 1.5..3.5 gives `"Jun-Aug"`.
///
/// A single-month target is just the month abbreviation.
pub fn seasonal_target(fdate: &NaiveDateTime, lead_low: f64, lead_high: f64) -> Result<String> {
    if lead_high < lead_low {
        return Err(Error::Template(format!(
            "lead_high {lead_high} is below lead_low {lead_low}"
        )));
    }
    let start = fdate
        .checked_add_months(Months::new(lead_offset(lead_low)?))
        .ok_or_else(|| Error::Template("target start out of range".into()))?;
    let end = fdate
        .checked_add_months(Months::new(lead_offset(lead_high)?))
        .ok_or_else(|| Error::Template("target end out of range".into()))?;

    let first = threeletters(start.month() as i64);
    if start.year() == end.year() && start.month() == end.month() {
        Ok(first)
    } else {
        Ok(format!("{first}-{}", threeletters(end.month() as i64)))
    }
}

/// Number of months spanned by a target such as `"Jul-Sep"` or `"Dec-Feb"`.
pub fn seasonal_target_length(target: &str) -> Result<i64> {
    let bad = || Error::Template(format!("invalid target season: {target:?}"));
    match target.split_once('-') {
        Some((a, b)) => {
            let a = month_number(a).ok_or_else(bad)? as i64;
            let b = month_number(b).ok_or_else(bad)? as i64;
            Ok((b - a).rem_euclid(12) + 1)
        }
        None => month_number(target).map(|_| 1).ok_or_else(bad),
    }
}

/// Number of monthly steps covered by the lead range.
pub fn seasonal_target_length_monthly(lead_low: f64, lead_high: f64) -> Result<i64> {
    let low = lead_offset(lead_low)? as i64;
    let high = lead_offset(lead_high)? as i64;
    if high < low {
        return Err(Error::Template(format!(
            "lead_high {lead_high} is below lead_low {lead_low}"
        )));
    }
    Ok(high - low + 1)
}

/// Renders an elapsed duration as `H:MM:SS.ffffff`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let micros = elapsed.subsec_micros();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if micros == 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{h}:{m:02}:{s:02}.{micros:06}")
    }
}
