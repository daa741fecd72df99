// Small formatting and arithmetic helpers shared by the stages and the CLI.
use num_format::{Locale, ToFormattedString};
use std::time::Duration;

/// Feet per statute mile; conductor lengths are stored in feet.
pub const FEET_PER_MILE: f64 = 5280.0;

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Convert a length in feet to miles rounded to two decimals.
pub fn feet_to_miles(feet: f64) -> f64 {
    round_to(feet / FEET_PER_MILE, 2)
}

/// Quote a value as an SQL string literal, doubling embedded quotes.
pub fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed decimals plus thousands separators on the integer part,
    // e.g. `1,234,567.89`.
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        res.push('.');
        res.push_str(frac);
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}

/// `HH:MM:SS`, as used in progress lines.
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
