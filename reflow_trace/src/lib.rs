//! Reflow-oven trace alignment: parse controller logs, rebuild the heater
//! duty-cycle as a step trace and register a solder paste profile against the
//! observed peak.

pub mod duty;
pub mod profile;
pub mod step;
pub mod temperature;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use duty::{parse_duty_log, reconstruct_duty, DutyCycleLog, DutyMode, Edge, IntervalEvent};
pub use profile::{
    align_profile, peak_sample, AlignedReferenceProfile, ProfileTable, ReferenceProfile,
    DEFAULT_PROFILE,
};
pub use step::{reconstruct_steps, PiecewiseTrace, StepSample};
pub use temperature::{parse_temperature_log, parse_timestamp};

#[derive(Error, Debug)]
pub enum ReflowError {
    #[error("invalid timestamp '{0}': expected seconds or minutes:seconds")]
    InvalidTimestamp(String),
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("duty-cycle log holds neither `time, fraction` nor `start-end: fraction` records")]
    AmbiguousInput,
    #[error("no data in {0}")]
    EmptyInput(&'static str),
    #[error("unknown reference profile: {0}")]
    UnknownProfile(String),
    #[error("invalid profile file: {0}")]
    ProfileFile(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A `(seconds, value)` point of a trace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time_s: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(time_s: f64, value: f64) -> Self {
        Self { time_s, value }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Params {
    /// Added to every duty-cycle time.
    pub duty_shift_s: f64,
    /// Reference profile to register against the run, if any.
    pub reference_profile: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DutyTrace {
    pub mode: DutyMode,
    pub trace: PiecewiseTrace,
}

/// Everything the renderer draws for one oven run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comparison {
    pub temperature: Vec<Sample>,
    pub peak: Sample,
    pub duty: Option<DutyTrace>,
    pub reference: Option<AlignedReferenceProfile>,
}

/// Run the full pipeline over already-loaded log text.
pub fn build_comparison(
    temperature_text: &str,
    duty_text: Option<&str>,
    profiles: &ProfileTable,
    params: &Params,
) -> Result<Comparison, ReflowError> {
    let temperature = parse_temperature_log(temperature_text)?;
    let peak = peak_sample(&temperature).ok_or(ReflowError::EmptyInput("temperature log"))?;
    info!(
        "Temperature log: {} samples, peak {:.1} C at {:.1} s",
        temperature.len(),
        peak.value,
        peak.time_s
    );

    let duty = match duty_text {
        Some(text) => {
            let log = parse_duty_log(text)?;
            let mode = log.mode();
            let mut trace = reconstruct_duty(&log, &temperature)?;
            if params.duty_shift_s != 0.0 {
                trace = trace.shifted(params.duty_shift_s);
            }
            debug!("Duty trace ({:?} mode): {} vertices", mode, trace.len());
            Some(DutyTrace { mode, trace })
        }
        None => None,
    };

    let reference = match params.reference_profile.as_deref() {
        Some(name) => Some(align_profile(&temperature, profiles.get(name)?)?),
        None => None,
    };

    Ok(Comparison {
        temperature,
        peak,
        duty,
        reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_temperature_log_is_rejected() {
        let err = build_comparison("no data here\n", None, &ProfileTable::builtin(), &Params::default())
            .unwrap_err();
        assert!(matches!(err, ReflowError::EmptyInput(_)));
    }

    #[test]
    fn unknown_profile_propagates() {
        let params = Params {
            reference_profile: Some("nope".into()),
            ..Params::default()
        };
        let err = build_comparison("0,25\n", None, &ProfileTable::builtin(), &params).unwrap_err();
        assert!(matches!(err, ReflowError::UnknownProfile(_)));
    }

    #[test]
    fn duty_shift_moves_duty_trace() {
        let params = Params {
            duty_shift_s: 19.0,
            ..Params::default()
        };
        let out = build_comparison(
            "0,25\n1000,30\n",
            Some("0:10, 1\n"),
            &ProfileTable::builtin(),
            &params,
        )
        .unwrap();
        let duty = out.duty.unwrap();
        assert_eq!(duty.mode, DutyMode::Instant);
        let times: Vec<f64> = duty.trace.points.iter().map(|p| p.time_s).collect();
        assert_eq!(times, vec![19.0, 29.0, 29.0]);
    }
}
