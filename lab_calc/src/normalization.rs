//! Per-well dispense volumes that bring every well to a target DNA mass.

use lims_types::{CapacityError, LimsResult, MissingDataError, ValidationError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use strum_macros::Display as StrumDisplay;

/// Volumes closer to zero than this are treated as zero when checking the
/// dilution capacity.
const VOLUME_TOLERANCE: f64 = 1e-9;

fn default_zero_concentration_threshold() -> f64 {
    1e-6
}

/// Every parameter of a normalization run. Stored verbatim on the owning
/// process so the run can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParameters {
    pub target_mass_ng: f64,
    pub total_volume_nl: f64,
    pub min_volume_nl: f64,
    pub max_volume_nl: f64,
    pub resolution_nl: f64,
    /// Drop wells with zero concentration from the output instead of
    /// dispensing the maximum volume of sample.
    pub reformat: bool,
    /// Concentrations at or below this (ng/µL) count as zero.
    #[serde(default = "default_zero_concentration_threshold")]
    pub zero_concentration_threshold: f64,
}

impl Default for NormalizationParameters {
    fn default() -> Self {
        NormalizationParameters {
            target_mass_ng: 5.0,
            total_volume_nl: 3500.0,
            min_volume_nl: 2.5,
            max_volume_nl: 3500.0,
            resolution_nl: 2.5,
            reformat: false,
            zero_concentration_threshold: default_zero_concentration_threshold(),
        }
    }
}

fn require(what: &'static str, requirement: &'static str, value: f64, ok: bool) -> LimsResult<()> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::InvalidParameter {
            what,
            requirement,
            value,
        }
        .into())
    }
}

impl NormalizationParameters {
    pub fn validate(&self) -> LimsResult<()> {
        require(
            "target mass",
            "greater than 0",
            self.target_mass_ng,
            self.target_mass_ng > 0.0,
        )?;
        require(
            "total volume",
            "greater than 0",
            self.total_volume_nl,
            self.total_volume_nl > 0.0,
        )?;
        require(
            "resolution",
            "greater than 0",
            self.resolution_nl,
            self.resolution_nl > 0.0,
        )?;
        require(
            "minimum volume",
            "at least 0",
            self.min_volume_nl,
            self.min_volume_nl >= 0.0,
        )?;
        require(
            "maximum volume",
            "at least the minimum volume",
            self.max_volume_nl,
            self.max_volume_nl >= self.min_volume_nl,
        )?;
        require(
            "zero concentration threshold",
            "at least 0",
            self.zero_concentration_threshold,
            self.zero_concentration_threshold >= 0.0,
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, StrumDisplay,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VolumeFlag {
    /// Sample volume raised to the minimum volume; the well receives more
    /// than the target mass.
    ClampedToMin,
    /// Sample volume capped at the maximum volume; the well receives less
    /// than the target mass.
    ClampedToMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVolumes {
    pub dna_volume_nl: f64,
    pub water_volume_nl: f64,
    pub flag: Option<VolumeFlag>,
}

/// Dispense volumes for one well. A concentration at or below the zero
/// threshold gets the maximum volume; dropping such wells is decided by
/// [`plan_normalization`].
pub fn normalize(concentration: f64, params: &NormalizationParameters) -> LimsResult<NormalizedVolumes> {
    params.validate()?;
    normalize_validated(concentration, params)
}

fn normalize_validated(
    concentration: f64,
    params: &NormalizationParameters,
) -> LimsResult<NormalizedVolumes> {
    if !(concentration >= 0.0) || !concentration.is_finite() {
        return Err(MissingDataError::InvalidConcentration {
            input: "normalization input".to_string(),
            value: concentration,
        }
        .into());
    }

    let (dna_volume_nl, flag) = if concentration <= params.zero_concentration_threshold {
        (params.max_volume_nl, Some(VolumeFlag::ClampedToMax))
    } else {
        // ng / (ng/µL) is µL
        let raw = params.target_mass_ng / concentration * 1000.0;
        let rounded = (raw / params.resolution_nl).round() * params.resolution_nl;
        if rounded < params.min_volume_nl {
            (params.min_volume_nl, Some(VolumeFlag::ClampedToMin))
        } else if rounded > params.max_volume_nl {
            (params.max_volume_nl, Some(VolumeFlag::ClampedToMax))
        } else {
            (rounded, None)
        }
    };

    let water_volume_nl = params.total_volume_nl - dna_volume_nl;
    if water_volume_nl < -VOLUME_TOLERANCE {
        return Err(CapacityError::DilutionVolumeTooSmall {
            dna_volume: dna_volume_nl,
            total_volume: params.total_volume_nl,
        }
        .into());
    }
    Ok(NormalizedVolumes {
        dna_volume_nl,
        water_volume_nl: water_volume_nl.max(0.0),
        flag,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    ZeroConcentration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedWell<K> {
    pub input: K,
    pub concentration: f64,
    pub volumes: NormalizedVolumes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedWell<K> {
    pub input: K,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationPlan<K> {
    /// In input order.
    pub wells: Vec<NormalizedWell<K>>,
    /// Wells left out because `reformat` was set.
    pub skipped: Vec<SkippedWell<K>>,
}

impl<K> NormalizationPlan<K> {
    pub fn flagged(&self) -> impl Iterator<Item = &NormalizedWell<K>> {
        self.wells.iter().filter(|w| w.volumes.flag.is_some())
    }
}

/// Normalize a set of wells. A missing concentration fails the whole plan.
pub fn plan_normalization<K>(
    inputs: &[(K, Option<f64>)],
    params: &NormalizationParameters,
) -> LimsResult<NormalizationPlan<K>>
where
    K: Clone + Display,
{
    params.validate()?;
    if inputs.is_empty() {
        return Err(ValidationError::NoInputs("normalization").into());
    }

    let mut plan = NormalizationPlan {
        wells: Vec::with_capacity(inputs.len()),
        skipped: Vec::new(),
    };
    for (input, concentration) in inputs {
        let Some(concentration) = *concentration else {
            return Err(MissingDataError::Concentration {
                input: input.to_string(),
            }
            .into());
        };
        if params.reformat && concentration.abs() <= params.zero_concentration_threshold {
            debug!("skipping {input}: zero concentration");
            plan.skipped.push(SkippedWell {
                input: input.clone(),
                reason: SkipReason::ZeroConcentration,
            });
            continue;
        }
        let volumes = normalize_validated(concentration, params).map_err(|e| match e {
            lims_types::LimsError::MissingData(MissingDataError::InvalidConcentration {
                value,
                ..
            }) => MissingDataError::InvalidConcentration {
                input: input.to_string(),
                value,
            }
            .into(),
            other => other,
        })?;
        plan.wells.push(NormalizedWell {
            input: input.clone(),
            concentration,
            volumes,
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use lims_types::LimsError;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_low_concentration_clamps_to_max() {
        let params = NormalizationParameters {
            target_mass_ng: 5.0,
            total_volume_nl: 3500.0,
            min_volume_nl: 2.5,
            max_volume_nl: 3500.0,
            resolution_nl: 2.5,
            reformat: false,
            ..Default::default()
        };
        let volumes = normalize(0.342, &params).unwrap();
        assert_eq!(
            volumes,
            NormalizedVolumes {
                dna_volume_nl: 3500.0,
                water_volume_nl: 0.0,
                flag: Some(VolumeFlag::ClampedToMax),
            }
        );
    }

    #[test]
    fn test_rounding_to_resolution() {
        let params = NormalizationParameters::default();
        // 5 ng / 3.1 ng/µL = 1612.9 nL -> 1612.5 nL
        let volumes = normalize(3.1, &params).unwrap();
        assert_eq!(volumes.dna_volume_nl, 1612.5);
        assert_eq!(volumes.water_volume_nl, 1887.5);
        assert_eq!(volumes.flag, None);

        let volumes = normalize(10000.0, &params).unwrap();
        assert_eq!(volumes.dna_volume_nl, 2.5);
        assert_eq!(volumes.flag, Some(VolumeFlag::ClampedToMin));
    }

    #[test]
    fn test_dilution_too_small() {
        let params = NormalizationParameters {
            total_volume_nl: 1000.0,
            ..Default::default()
        };
        let err = normalize(0.5, &params).unwrap_err();
        assert_eq!(
            err,
            LimsError::Capacity(CapacityError::DilutionVolumeTooSmall {
                dna_volume: 3500.0,
                total_volume: 1000.0
            })
        );
    }

    #[test]
    fn test_invalid_parameters() {
        let params = NormalizationParameters {
            resolution_nl: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            normalize(1.0, &params).unwrap_err(),
            LimsError::Validation(ValidationError::InvalidParameter { .. })
        ));
        let params = NormalizationParameters {
            min_volume_nl: 10.0,
            max_volume_nl: 5.0,
            ..Default::default()
        };
        assert!(normalize(1.0, &params).is_err());
    }

    #[test]
    fn test_plan_reformat_skips_zero_wells() {
        let inputs = vec![("A1", Some(0.0)), ("A2", Some(2.0)), ("A3", Some(0.0))];
        let params = NormalizationParameters {
            reformat: true,
            ..Default::default()
        };
        let plan = plan_normalization(&inputs, &params).unwrap();
        assert_eq!(plan.wells.len(), 1);
        assert_eq!(plan.wells[0].input, "A2");
        assert_eq!(plan.wells[0].volumes.dna_volume_nl, 2500.0);
        assert_eq!(
            plan.skipped.iter().map(|s| s.input).collect::<Vec<_>>(),
            vec!["A1", "A3"]
        );

        let params = NormalizationParameters::default();
        let plan = plan_normalization(&inputs, &params).unwrap();
        assert_eq!(plan.wells.len(), 3);
        assert!(plan.skipped.is_empty());
        assert_eq!(plan.flagged().count(), 2);
        assert_eq!(plan.wells[0].volumes.dna_volume_nl, 3500.0);
    }

    #[test]
    fn test_plan_missing_concentration() {
        let inputs = vec![("A1", Some(1.0)), ("B7", None)];
        let err = plan_normalization(&inputs, &NormalizationParameters::default()).unwrap_err();
        assert_eq!(
            err,
            MissingDataError::Concentration {
                input: "B7".to_string()
            }
            .into()
        );
        let inputs = vec![("C3", Some(-1.0))];
        let err = plan_normalization(&inputs, &NormalizationParameters::default()).unwrap_err();
        assert_eq!(
            err,
            MissingDataError::InvalidConcentration {
                input: "C3".to_string(),
                value: -1.0
            }
            .into()
        );
    }

    proptest! {
        #[test]
        fn prop_volumes_fill_total_and_respect_bounds(
            concentration in 0.0f64..500.0,
            target in 0.1f64..50.0,
            min_steps in 0u32..4,
            extra_steps in 0u32..2000,
        ) {
            let resolution = 2.5;
            let min_volume = min_steps as f64 * resolution;
            let max_volume = min_volume + extra_steps as f64 * resolution;
            let params = NormalizationParameters {
                target_mass_ng: target,
                total_volume_nl: max_volume + 100.0,
                min_volume_nl: min_volume,
                max_volume_nl: max_volume,
                resolution_nl: resolution,
                reformat: false,
                ..Default::default()
            };
            let volumes = normalize(concentration, &params).unwrap();
            assert_approx_eq!(volumes.dna_volume_nl + volumes.water_volume_nl, params.total_volume_nl);
            prop_assert!(volumes.dna_volume_nl >= min_volume);
            prop_assert!(volumes.dna_volume_nl <= max_volume);
            prop_assert!(volumes.water_volume_nl >= 0.0);
            prop_assert_eq!(normalize(concentration, &params).unwrap(), volumes);
        }
    }
}
