//! Heater duty-cycle logs.
//!
//! Two encodings are accepted. Instant records (`m:s, fraction`) carry their
//! own clock. Interval records (`start-end: fraction`) carry no time at all:
//! they fire when the oven temperature crosses a threshold, so their timing
//! is borrowed from the temperature trace.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::step::{reconstruct_steps, PiecewiseTrace};
use crate::temperature::{check_time_order, parse_field, parse_timestamp};
use crate::{ReflowError, Sample};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    /// `start < end`: fires once the temperature reaches `start`.
    Rising,
    /// `start > end`: fires once the temperature drops below `end`.
    Falling,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalEvent {
    pub start: f64,
    pub end: f64,
    pub fraction: f64,
}

impl IntervalEvent {
    pub fn edge(&self) -> Edge {
        if self.start < self.end {
            Edge::Rising
        } else {
            Edge::Falling
        }
    }

    fn fires_at(&self, celsius: f64) -> bool {
        match self.edge() {
            Edge::Rising => celsius >= self.start,
            Edge::Falling => celsius < self.end,
        }
    }
}

/// A duty-cycle log after format detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DutyCycleLog {
    /// `(seconds, fraction)` pairs on the log's own clock.
    Instant(Vec<(f64, f64)>),
    /// Temperature-triggered changes, in file order.
    Interval(Vec<IntervalEvent>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DutyMode {
    Instant,
    Trigger,
}

impl DutyCycleLog {
    pub fn mode(&self) -> DutyMode {
        match self {
            DutyCycleLog::Instant(_) => DutyMode::Instant,
            DutyCycleLog::Interval(_) => DutyMode::Trigger,
        }
    }
}

enum DutyLine {
    Instant(f64, f64),
    Interval(IntervalEvent),
}

/// Detect the encoding and parse every record.
///
/// Instant records take precedence: a file holding any of them is read in
/// instant mode and its interval records are dropped. Instant times start at
/// the reconstruction seed (`t = 0`) and never decrease.
pub fn parse_duty_log(text: &str) -> Result<DutyCycleLog, ReflowError> {
    let mut instants = Vec::new();
    let mut intervals = Vec::new();
    let mut last_instant = 0.0;
    for (idx, line) in text.lines().enumerate() {
        match parse_duty_line(line, idx + 1)? {
            Some(DutyLine::Instant(t, fraction)) => {
                check_time_order(last_instant, t, idx + 1)?;
                last_instant = t;
                instants.push((t, fraction));
            }
            Some(DutyLine::Interval(event)) => intervals.push(event),
            None => {}
        }
    }

    if !instants.is_empty() {
        if !intervals.is_empty() {
            warn!(
                "Duty log mixes encodings; ignoring {} interval record(s)",
                intervals.len()
            );
        }
        Ok(DutyCycleLog::Instant(instants))
    } else if !intervals.is_empty() {
        Ok(DutyCycleLog::Interval(intervals))
    } else {
        Err(ReflowError::AmbiguousInput)
    }
}

fn parse_duty_line(line: &str, line_no: usize) -> Result<Option<DutyLine>, ReflowError> {
    let line = line.trim();
    let malformed = |reason: String| ReflowError::MalformedRecord {
        line: line_no,
        reason,
    };

    if line.contains(',') {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 2 {
            return Err(malformed(format!(
                "expected 2 fields, found {}",
                fields.len()
            )));
        }
        let t = parse_timestamp(fields[0]).map_err(|e| malformed(e.to_string()))?;
        let fraction = parse_fraction(fields[1], line_no)?;
        return Ok(Some(DutyLine::Instant(t, fraction)));
    }

    if let Some((range, fraction)) = line.split_once(':') {
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| malformed(format!("interval '{}' lacks a '-'", range.trim())))?;
        let start = parse_field(start.trim(), "interval start", line_no)?;
        let end = parse_field(end.trim(), "interval end", line_no)?;
        if start == end {
            return Err(malformed(format!(
                "interval {}-{} has no direction",
                start, end
            )));
        }
        let fraction = parse_fraction(fraction.trim(), line_no)?;
        return Ok(Some(DutyLine::Interval(IntervalEvent {
            start,
            end,
            fraction,
        })));
    }

    Ok(None)
}

fn parse_fraction(field: &str, line_no: usize) -> Result<f64, ReflowError> {
    let value = parse_field(field, "duty fraction", line_no)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ReflowError::MalformedRecord {
            line: line_no,
            reason: format!("duty fraction {} outside [0, 1]", value),
        });
    }
    Ok(value)
}

/// Build the plotted duty trace.
///
/// In trigger mode the trace's clock is the temperature log's: each interval
/// event fires at the first sample (after the previous event fired) that
/// crosses its threshold.
pub fn reconstruct_duty(
    log: &DutyCycleLog,
    temperature: &[Sample],
) -> Result<PiecewiseTrace, ReflowError> {
    match log {
        DutyCycleLog::Instant(events) => Ok(reconstruct_steps(events)),
        DutyCycleLog::Interval(events) => {
            if temperature.is_empty() {
                return Err(ReflowError::EmptyInput("temperature trace"));
            }
            Ok(reconstruct_steps(&trigger_transitions(events, temperature)))
        }
    }
}

fn trigger_transitions(events: &[IntervalEvent], temperature: &[Sample]) -> Vec<(f64, f64)> {
    let mut transitions = Vec::with_capacity(events.len());
    let mut next = 0usize;
    for sample in temperature {
        let Some(event) = events.get(next) else {
            break;
        };
        if event.fires_at(sample.value) {
            transitions.push((sample.time_s, event.fraction));
            next += 1;
        }
    }
    if next < events.len() {
        // Truncated rather than failed; the run simply never reached them.
        debug!(
            "Temperature trace ended with {} interval event(s) unfired",
            events.len() - next
        );
    }
    transitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepSample;

    fn trace(points: &[(f64, f64)]) -> Vec<Sample> {
        points.iter().map(|&(t, v)| Sample::new(t, v)).collect()
    }

    #[test]
    fn instant_records_use_timestamp_parser() {
        let log = parse_duty_log("0:0, 1\n1:12, 0\n133, 1\n").unwrap();
        assert_eq!(
            log,
            DutyCycleLog::Instant(vec![(0.0, 1.0), (72.0, 0.0), (133.0, 1.0)])
        );
        assert_eq!(log.mode(), DutyMode::Instant);
    }

    #[test]
    fn interval_records_carry_direction() {
        let log = parse_duty_log("40-100: 1\n100-40: 0\n").unwrap();
        let DutyCycleLog::Interval(events) = log else {
            panic!("expected interval log");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].edge(), Edge::Rising);
        assert_eq!(events[1].edge(), Edge::Falling);
        assert_eq!(events[1].fraction, 0.0);
    }

    #[test]
    fn instant_mode_wins_in_mixed_file() {
        let log = parse_duty_log("40-100: 1\n0:10, 0.5\n").unwrap();
        assert_eq!(log, DutyCycleLog::Instant(vec![(10.0, 0.5)]));
    }

    #[test]
    fn no_records_is_ambiguous() {
        assert!(matches!(
            parse_duty_log("\nheater log\n"),
            Err(ReflowError::AmbiguousInput)
        ));
        assert!(matches!(parse_duty_log(""), Err(ReflowError::AmbiguousInput)));
    }

    #[test]
    fn malformed_records_are_rejected() {
        for text in [
            "0:10, 0.5, 1\n",
            "zz, 1\n",
            "0:10, 1.5\n",
            "40100: 1\n",
            "40-100: lots\n",
            "50-50: 1\n",
        ] {
            assert!(
                matches!(
                    parse_duty_log(text),
                    Err(ReflowError::MalformedRecord { line: 1, .. })
                ),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn instant_records_must_move_forward() {
        let err = parse_duty_log("2:00, 1\n0:30, 0\n").unwrap_err();
        match err {
            ReflowError::MalformedRecord { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("backwards"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Nothing may precede the t = 0 seed of the step trace.
        assert!(matches!(
            parse_duty_log("-5, 1\n"),
            Err(ReflowError::MalformedRecord { line: 1, .. })
        ));
        assert!(matches!(
            parse_duty_log("NaN, 1\n"),
            Err(ReflowError::MalformedRecord { line: 1, .. })
        ));
        let log = parse_duty_log("0:30, 1\n0:30, 0\n").unwrap();
        assert_eq!(log, DutyCycleLog::Instant(vec![(30.0, 1.0), (30.0, 0.0)]));
    }

    #[test]
    fn instant_reconstruction_is_step_trace() {
        let log = DutyCycleLog::Instant(vec![(10.0, 1.0)]);
        let out = reconstruct_duty(&log, &[]).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.points[1], StepSample::new(10.0, None));
    }

    #[test]
    fn trigger_mode_borrows_temperature_clock() {
        let temps = trace(&[(0.0, 25.0), (10.0, 50.0), (20.0, 90.0), (30.0, 60.0)]);
        let log = parse_duty_log("40-100: 1\n100-40: 0\n").unwrap();
        let out = reconstruct_duty(&log, &temps).unwrap();
        // The falling event never sees the oven drop below 40 and stays unfired.
        assert_eq!(
            out.points,
            vec![
                StepSample::new(0.0, None),
                StepSample::new(10.0, None),
                StepSample::new(10.0, Some(1.0)),
            ]
        );
    }

    #[test]
    fn trigger_mode_fires_events_in_order() {
        let temps = trace(&[
            (0.0, 25.0),
            (10.0, 60.0),
            (20.0, 160.0),
            (30.0, 120.0),
            (40.0, 80.0),
        ]);
        let log = parse_duty_log("50-200: 1\n150-100: 0.25\n").unwrap();
        let out = reconstruct_duty(&log, &temps).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.points[2], StepSample::new(10.0, Some(1.0)));
        assert_eq!(out.points[3], StepSample::new(40.0, Some(1.0)));
        assert_eq!(out.points[4], StepSample::new(40.0, Some(0.25)));
    }

    #[test]
    fn one_event_fires_per_sample() {
        let temps = trace(&[(0.0, 100.0), (5.0, 100.0)]);
        let log = parse_duty_log("40-100: 1\n50-200: 0.5\n").unwrap();
        let out = reconstruct_duty(&log, &temps).unwrap();
        assert_eq!(out.points[2], StepSample::new(0.0, Some(1.0)));
        assert_eq!(out.points[4], StepSample::new(5.0, Some(0.5)));
    }

    #[test]
    fn trigger_mode_needs_temperature() {
        let log = parse_duty_log("40-100: 1\n").unwrap();
        assert!(matches!(
            reconstruct_duty(&log, &[]),
            Err(ReflowError::EmptyInput(_))
        ));
    }
}
