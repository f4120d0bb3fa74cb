// Solder paste reflow profiles and peak-to-peak registration against an
// observed oven run. Profiles are fixed by the paste manufacturer; only the
// oven's timing varies, so registration is a single horizontal shift.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ReflowError, Sample};

pub const DEFAULT_PROFILE: &str = "TS391AX50";

/// Built-in profiles as `(name, [(seconds, celsius)])`.
pub const BUILTIN_PROFILES: &[(&str, &[(f64, f64)])] = &[(
    "TS391AX50",
    &[
        (0.0, 25.0),
        (30.0, 100.0),
        (120.0, 150.0),
        (150.0, 183.0),
        (210.0, 235.0),
        (240.0, 183.0),
    ],
)];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProfile {
    pub name: String,
    pub points: Vec<(f64, f64)>,
}

impl ReferenceProfile {
    pub fn new(name: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    /// First control point holding the maximum temperature.
    pub fn peak(&self) -> Option<(f64, f64)> {
        first_max_by_value(self.points.iter().copied(), |p| p.1)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignedReferenceProfile {
    pub name: String,
    pub shift_s: f64,
    pub points: Vec<(f64, f64)>,
}

/// Lookup table of reference profiles keyed by case-insensitive name.
#[derive(Clone, Debug)]
pub struct ProfileTable {
    profiles: BTreeMap<String, ReferenceProfile>,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileTable {
    pub fn builtin() -> Self {
        let mut table = Self {
            profiles: BTreeMap::new(),
        };
        for (name, points) in BUILTIN_PROFILES {
            table.insert(ReferenceProfile::new(*name, points.to_vec()));
        }
        table
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, profile: ReferenceProfile) {
        self.profiles
            .insert(profile.name.to_ascii_uppercase(), profile);
    }

    pub fn get(&self, name: &str) -> Result<&ReferenceProfile, ReflowError> {
        self.profiles
            .get(&name.trim().to_ascii_uppercase())
            .ok_or_else(|| ReflowError::UnknownProfile(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Merge profiles from JSON of the form `{"NAME": [[seconds, celsius], ...]}`.
    pub fn extend_from_json(&mut self, text: &str) -> Result<usize, ReflowError> {
        let parsed: BTreeMap<String, Vec<(f64, f64)>> =
            serde_json::from_str(text).map_err(|e| ReflowError::ProfileFile(e.to_string()))?;
        let mut added = 0;
        for (name, points) in parsed {
            if points.is_empty() {
                return Err(ReflowError::ProfileFile(format!(
                    "profile '{}' has no points",
                    name
                )));
            }
            if points.windows(2).any(|w| w[1].0 < w[0].0) {
                return Err(ReflowError::ProfileFile(format!(
                    "profile '{}' times are not in order",
                    name
                )));
            }
            debug!("Loaded reference profile '{}' ({} points)", name, points.len());
            self.insert(ReferenceProfile::new(name, points));
            added += 1;
        }
        Ok(added)
    }

    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize, ReflowError> {
        let text = fs::read_to_string(path)?;
        self.extend_from_json(&text)
    }
}

/// First sample holding the maximum temperature.
pub fn peak_sample(trace: &[Sample]) -> Option<Sample> {
    first_max_by_value(trace.iter().copied(), |s| s.value)
}

/// Shift `profile` so its peak lands on the observed trace's peak.
pub fn align_profile(
    observed: &[Sample],
    profile: &ReferenceProfile,
) -> Result<AlignedReferenceProfile, ReflowError> {
    let peak = peak_sample(observed).ok_or(ReflowError::EmptyInput("temperature trace"))?;
    let (profile_peak_time, _) = profile
        .peak()
        .ok_or(ReflowError::EmptyInput("reference profile"))?;
    let shift_s = peak.time_s - profile_peak_time;
    debug!(
        "Aligning profile {}: observed peak {:.1} C at {:.1} s, shift {:.1} s",
        profile.name, peak.value, peak.time_s, shift_s
    );
    Ok(AlignedReferenceProfile {
        name: profile.name.clone(),
        shift_s,
        points: profile
            .points
            .iter()
            .map(|&(t, c)| (t + shift_s, c))
            .collect(),
    })
}

fn first_max_by_value<T: Copy>(
    items: impl Iterator<Item = T>,
    value: impl Fn(&T) -> f64,
) -> Option<T> {
    let mut best: Option<T> = None;
    for item in items {
        let v = value(&item);
        if v.is_nan() {
            continue;
        }
        match best {
            Some(ref b) if value(b) >= v => {}
            _ => best = Some(item),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(points: &[(f64, f64)]) -> Vec<Sample> {
        points.iter().map(|&(t, v)| Sample::new(t, v)).collect()
    }

    #[test]
    fn builtin_table_has_default_profile() {
        let table = ProfileTable::builtin();
        let profile = table.get(DEFAULT_PROFILE).unwrap();
        assert_eq!(profile.points.len(), 6);
        assert_eq!(profile.points[0], (0.0, 25.0));
        assert_eq!(profile.points[5], (240.0, 183.0));
        assert_eq!(profile.peak(), Some((210.0, 235.0)));
        assert!(table.get("ts391ax50").is_ok());
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let table = ProfileTable::builtin();
        assert!(matches!(
            table.get("SAC305"),
            Err(ReflowError::UnknownProfile(_))
        ));
    }

    #[test]
    fn shift_moves_every_point_by_peak_offset() {
        let observed = trace(&[(0.0, 25.0), (150.0, 180.0), (300.0, 240.0), (400.0, 100.0)]);
        let profile = ProfileTable::builtin().get(DEFAULT_PROFILE).unwrap().clone();
        let aligned = align_profile(&observed, &profile).unwrap();
        assert_eq!(aligned.shift_s, 90.0);
        for (orig, moved) in profile.points.iter().zip(aligned.points.iter()) {
            assert_eq!(moved.0 - orig.0, 90.0);
            assert_eq!(moved.1, orig.1);
        }
    }

    #[test]
    fn peak_ties_use_first_occurrence() {
        let observed = trace(&[(1.0, 10.0), (2.0, 50.0), (3.0, 50.0), (4.0, f64::NAN)]);
        assert_eq!(peak_sample(&observed), Some(Sample::new(2.0, 50.0)));
    }

    #[test]
    fn empty_inputs_fail() {
        let profile = ProfileTable::builtin().get(DEFAULT_PROFILE).unwrap().clone();
        assert!(matches!(
            align_profile(&[], &profile),
            Err(ReflowError::EmptyInput(_))
        ));
        let empty = ReferenceProfile::new("EMPTY", Vec::new());
        assert!(matches!(
            align_profile(&trace(&[(0.0, 20.0)]), &empty),
            Err(ReflowError::EmptyInput(_))
        ));
    }

    #[test]
    fn json_profiles_extend_table() {
        let mut table = ProfileTable::builtin();
        let added = table
            .extend_from_json(r#"{"SAC305": [[0, 25], [90, 150], [200, 245], [260, 200]]}"#)
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("sac305").unwrap().peak(), Some((200.0, 245.0)));
        assert!(table.extend_from_json("{\"X\": []}").is_err());
        assert!(table.extend_from_json("[1, 2]").is_err());
        assert!(table
            .extend_from_json(r#"{"BACKWARDS": [[10, 25], [5, 30]]}"#)
            .is_err());
    }
}
