//! Human readable intervals for periodic templates
//!
//! An interval is a comma separated sum of terms; each term is a product of
//! numbers and units separated by spaces or `*`:
//!
//! ```text
//! "2 hours"            7200
//! "1 day, 30 minutes"  88200
//! "3*hours"            10800
//! "90m"                5400
//! ```

use crate::error::{WorkerError, WorkerResult};

fn unit_seconds(unit: &str) -> Option<f64> {
    let seconds = match unit.to_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        "month" | "months" => 2_592_000,
        "y" | "year" | "years" => 31_536_000,
        _ => return None,
    };
    Some(seconds as f64)
}

/// Split `"90m"` into `["90", "m"]`; other tokens pass through
fn split_glued(token: &str) -> Vec<&str> {
    let boundary = token
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i);
    match boundary {
        Some(i) if i > 0 => vec![&token[..i], &token[i..]],
        _ => vec![token],
    }
}

fn parse_term(term: &str, raw: &str) -> WorkerResult<f64> {
    let mut product = 1.0;
    let mut factors = 0;
    for token in term
        .split(|c: char| c.is_whitespace() || c == '*')
        .filter(|t| !t.is_empty())
        .flat_map(split_glued)
    {
        let factor = match token.parse::<f64>() {
            Ok(number) if number.is_finite() && number >= 0.0 => number,
            Ok(_) => return Err(WorkerError::InvalidInterval(raw.to_string())),
            Err(_) => unit_seconds(token)
                .ok_or_else(|| WorkerError::InvalidInterval(raw.to_string()))?,
        };
        product *= factor;
        factors += 1;
    }
    if factors == 0 {
        return Err(WorkerError::InvalidInterval(raw.to_string()));
    }
    Ok(product)
}

/// Parse an interval into seconds, reporting malformed input
pub fn try_parse_interval(raw: &str) -> WorkerResult<u64> {
    let mut total = 0.0;
    for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        total += parse_term(term, raw)?;
    }
    Ok(total.round() as u64)
}

/// Parse an interval into seconds
///
/// Unparsable input yields 0, which the scheduler treats as never due.
pub fn parse_interval(raw: &str) -> u64 {
    try_parse_interval(raw).unwrap_or(0)
}
