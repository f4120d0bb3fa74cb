//! Timestamp tokens and the thermocouple logger's `millis, celsius` output.

use crate::{ReflowError, Sample};

/// Parse a time token: `"M:S"` yields `M * 60 + S`, anything else is raw seconds.
pub fn parse_timestamp(token: &str) -> Result<f64, ReflowError> {
    let invalid = || ReflowError::InvalidTimestamp(token.trim().to_string());
    let seconds = match token.split_once(':') {
        Some((minutes, seconds)) => {
            if seconds.contains(':') {
                return Err(invalid());
            }
            let m: f64 = minutes.trim().parse().map_err(|_| invalid())?;
            let s: f64 = seconds.trim().parse().map_err(|_| invalid())?;
            m * 60.0 + s
        }
        None => token.trim().parse().map_err(|_| invalid())?,
    };
    if !seconds.is_finite() {
        return Err(invalid());
    }
    Ok(seconds)
}

/// Parse a temperature log held in memory.
///
/// Lines without a `,` carry no sample (blank lines, headers, the bare
/// heartbeat stamps the controller prints) and are skipped. Every other line
/// must be `<milliseconds>, <celsius>`, with timestamps never decreasing.
pub fn parse_temperature_log(text: &str) -> Result<Vec<Sample>, ReflowError> {
    let mut out: Vec<Sample> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(sample) = parse_temperature_line(line, idx + 1)? else {
            continue;
        };
        if let Some(prev) = out.last() {
            check_time_order(prev.time_s, sample.time_s, idx + 1)?;
        }
        out.push(sample);
    }
    Ok(out)
}

/// Fails when `time_s` lies before `prev_s`; equal stamps are allowed.
pub(crate) fn check_time_order(
    prev_s: f64,
    time_s: f64,
    line_no: usize,
) -> Result<(), ReflowError> {
    if time_s < prev_s {
        return Err(ReflowError::MalformedRecord {
            line: line_no,
            reason: format!("time goes backwards ({} s after {} s)", time_s, prev_s),
        });
    }
    Ok(())
}

fn parse_temperature_line(line: &str, line_no: usize) -> Result<Option<Sample>, ReflowError> {
    if !line.contains(',') {
        return Ok(None);
    }
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() != 2 {
        return Err(ReflowError::MalformedRecord {
            line: line_no,
            reason: format!("expected 2 fields, found {}", fields.len()),
        });
    }
    let stamp_ms = parse_field(fields[0], "timestamp", line_no)?;
    let celsius = parse_field(fields[1], "temperature", line_no)?;
    Ok(Some(Sample::new(stamp_ms / 1000.0, celsius)))
}

/// Parse a finite number; `inf` and `NaN` are rejected like any other junk.
pub(crate) fn parse_field(field: &str, what: &str, line_no: usize) -> Result<f64, ReflowError> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ReflowError::MalformedRecord {
            line: line_no,
            reason: format!("{} '{}' is not a number", what, field),
        }),
    }
}
