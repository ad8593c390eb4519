//! Pooling strategies: how much of each input goes into one output pool.
//!
//! The algorithm name and its parameters are persisted with the pooling
//! process, so [`PoolingStrategy`] is a closed set of parameter structs and
//! [`compute_pooling`] dispatches on it. Parameters arriving as a flat
//! key-value blob are validated once, in [`PoolingStrategy::from_flat`].
//!
//! Equal-volume and minimum-volume pooling compute volumes and derive each
//! input's share of the pool from them. Pool-of-pools takes the shares as
//! primary and derives volumes from the requested pool volume.

use crate::PERCENTAGE_TOLERANCE;
use lims_types::{LimsResult, MissingDataError, ValidationError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use strum_macros::Display as StrumDisplay;

/// Every input receives the same volume regardless of concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualVolumeParams {
    pub volume_nl: f64,
    /// Informational only.
    #[serde(default)]
    pub average_fragment_size_bp: Option<f64>,
}

/// Each input contributes an equal share of the target quantity, subject to a
/// floor volume and a floor concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimumVolumeParams {
    pub total_quantity_ng: f64,
    pub floor_concentration: f64,
    pub floor_volume_nl: f64,
}

/// Combine existing pools by share of the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolOfPoolsParams {
    pub total_volume_nl: f64,
    /// Share of the output by input position. Inputs without an override
    /// split what is left equally.
    #[serde(default)]
    pub overrides: BTreeMap<usize, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum PoolingStrategy {
    EqualVolume(EqualVolumeParams),
    MinimumVolume(MinimumVolumeParams),
    PoolOfPools(PoolOfPoolsParams),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, StrumDisplay,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PoolingFlag {
    /// Input below the floor concentration; received the floor volume.
    FloorConcentration,
    /// Computed volume was below the floor volume and was raised to it.
    FloorVolume,
}

/// Volume and share of one input before it is attached to its key.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Allocation {
    volume_nl: f64,
    percentage: f64,
    flag: Option<PoolingFlag>,
}

/// One pooling implementation.
trait PoolingAlgorithm {
    const NAME: &'static str;

    fn validate(&self) -> LimsResult<()>;

    /// `concentrations` are already checked to be finite and non-negative.
    fn allocate(&self, concentrations: &[f64]) -> LimsResult<Vec<Allocation>>;
}

fn positive(what: &'static str, value: f64) -> LimsResult<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::InvalidParameter {
            what,
            requirement: "greater than 0",
            value,
        }
        .into())
    }
}

/// Shares derived from volumes.
fn shares_from_volumes(
    volumes: Vec<(f64, Option<PoolingFlag>)>,
) -> LimsResult<Vec<Allocation>> {
    let total: f64 = volumes.iter().map(|(v, _)| v).sum();
    positive("pooled volume", total)?;
    Ok(volumes
        .into_iter()
        .map(|(volume_nl, flag)| Allocation {
            volume_nl,
            percentage: volume_nl / total,
            flag,
        })
        .collect())
}

impl PoolingAlgorithm for EqualVolumeParams {
    const NAME: &'static str = "equal_volume";

    fn validate(&self) -> LimsResult<()> {
        positive("volume per input", self.volume_nl)?;
        if let Some(size) = self.average_fragment_size_bp {
            positive("average fragment size", size)?;
        }
        Ok(())
    }

    fn allocate(&self, concentrations: &[f64]) -> LimsResult<Vec<Allocation>> {
        shares_from_volumes(concentrations.iter().map(|_| (self.volume_nl, None)).collect())
    }
}

impl PoolingAlgorithm for MinimumVolumeParams {
    const NAME: &'static str = "minimum_volume";

    fn validate(&self) -> LimsResult<()> {
        positive("total quantity", self.total_quantity_ng)?;
        positive("floor concentration", self.floor_concentration)?;
        positive("floor volume", self.floor_volume_nl)
    }

    fn allocate(&self, concentrations: &[f64]) -> LimsResult<Vec<Allocation>> {
        let share_ng = self.total_quantity_ng / concentrations.len() as f64;
        let volumes = concentrations
            .iter()
            .map(|&concentration| {
                if concentration < self.floor_concentration {
                    (self.floor_volume_nl, Some(PoolingFlag::FloorConcentration))
                } else {
                    let volume = share_ng / concentration * 1000.0;
                    if volume < self.floor_volume_nl {
                        (self.floor_volume_nl, Some(PoolingFlag::FloorVolume))
                    } else {
                        (volume, None)
                    }
                }
            })
            .collect();
        shares_from_volumes(volumes)
    }
}

impl PoolingAlgorithm for PoolOfPoolsParams {
    const NAME: &'static str = "pool_of_pools";

    fn validate(&self) -> LimsResult<()> {
        positive("total pool volume", self.total_volume_nl)?;
        for (&input, &value) in &self.overrides {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::InvalidPercentageOverride { input, value }.into());
            }
        }
        Ok(())
    }

    fn allocate(&self, concentrations: &[f64]) -> LimsResult<Vec<Allocation>> {
        let n = concentrations.len();
        if let Some((&input, &value)) = self.overrides.iter().find(|(i, _)| **i >= n) {
            return Err(ValidationError::InvalidPercentageOverride { input, value }.into());
        }
        let overridden: f64 = self.overrides.values().sum();
        let remaining = 1.0 - overridden;
        let num_free = n - self.overrides.len();
        if remaining < -PERCENTAGE_TOLERANCE
            || (num_free == 0 && remaining.abs() > PERCENTAGE_TOLERANCE)
        {
            return Err(ValidationError::PercentagesDoNotSumToOne(overridden).into());
        }
        let free_share = if num_free == 0 {
            0.0
        } else {
            remaining.max(0.0) / num_free as f64
        };
        Ok((0..n)
            .map(|i| {
                let percentage = self.overrides.get(&i).copied().unwrap_or(free_share);
                Allocation {
                    volume_nl: percentage * self.total_volume_nl,
                    percentage,
                    flag: None,
                }
            })
            .collect())
    }
}

impl PoolingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            PoolingStrategy::EqualVolume(_) => EqualVolumeParams::NAME,
            PoolingStrategy::MinimumVolume(_) => MinimumVolumeParams::NAME,
            PoolingStrategy::PoolOfPools(_) => PoolOfPoolsParams::NAME,
        }
    }

    /// Whether the algorithm combines existing pools rather than library wells.
    pub fn combines_pools(&self) -> bool {
        matches!(self, PoolingStrategy::PoolOfPools(_))
    }

    pub fn validate(&self) -> LimsResult<()> {
        match self {
            PoolingStrategy::EqualVolume(p) => p.validate(),
            PoolingStrategy::MinimumVolume(p) => p.validate(),
            PoolingStrategy::PoolOfPools(p) => p.validate(),
        }
    }

    fn allocate(&self, concentrations: &[f64]) -> LimsResult<Vec<Allocation>> {
        match self {
            PoolingStrategy::EqualVolume(p) => p.allocate(concentrations),
            PoolingStrategy::MinimumVolume(p) => p.allocate(concentrations),
            PoolingStrategy::PoolOfPools(p) => p.allocate(concentrations),
        }
    }

    /// Flatten into the algorithm name plus a key-value parameter set.
    pub fn to_flat(&self) -> (String, BTreeMap<String, f64>) {
        let mut flat = BTreeMap::new();
        match self {
            PoolingStrategy::EqualVolume(p) => {
                flat.insert("volume_nl".to_string(), p.volume_nl);
                if let Some(size) = p.average_fragment_size_bp {
                    flat.insert("average_fragment_size_bp".to_string(), size);
                }
            }
            PoolingStrategy::MinimumVolume(p) => {
                flat.insert("total_quantity_ng".to_string(), p.total_quantity_ng);
                flat.insert("floor_concentration".to_string(), p.floor_concentration);
                flat.insert("floor_volume_nl".to_string(), p.floor_volume_nl);
            }
            PoolingStrategy::PoolOfPools(p) => {
                flat.insert("total_volume_nl".to_string(), p.total_volume_nl);
                for (input, value) in &p.overrides {
                    flat.insert(format!("{OVERRIDE_PREFIX}{input}"), *value);
                }
            }
        }
        (self.name().to_string(), flat)
    }

    /// Build and validate a strategy from an algorithm name and a flat
    /// parameter set. Unknown or missing keys are rejected.
    pub fn from_flat(algorithm: &str, params: &BTreeMap<String, f64>) -> LimsResult<Self> {
        let mut reader = FlatParams {
            algorithm,
            params: params.clone(),
        };
        let strategy = if algorithm == EqualVolumeParams::NAME {
            PoolingStrategy::EqualVolume(EqualVolumeParams {
                volume_nl: reader.required("volume_nl")?,
                average_fragment_size_bp: reader.optional("average_fragment_size_bp"),
            })
        } else if algorithm == MinimumVolumeParams::NAME {
            PoolingStrategy::MinimumVolume(MinimumVolumeParams {
                total_quantity_ng: reader.required("total_quantity_ng")?,
                floor_concentration: reader.required("floor_concentration")?,
                floor_volume_nl: reader.required("floor_volume_nl")?,
            })
        } else if algorithm == PoolOfPoolsParams::NAME {
            PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
                total_volume_nl: reader.required("total_volume_nl")?,
                overrides: reader.overrides()?,
            })
        } else {
            return Err(ValidationError::UnknownAlgorithm(algorithm.to_string()).into());
        };
        reader.finish()?;
        strategy.validate()?;
        Ok(strategy)
    }
}

const OVERRIDE_PREFIX: &str = "override.";

struct FlatParams<'a> {
    algorithm: &'a str,
    params: BTreeMap<String, f64>,
}

impl FlatParams<'_> {
    fn required(&mut self, key: &'static str) -> LimsResult<f64> {
        self.params.remove(key).ok_or_else(|| {
            ValidationError::MissingAlgorithmParameter {
                algorithm: self.algorithm.to_string(),
                parameter: key,
            }
            .into()
        })
    }

    fn optional(&mut self, key: &str) -> Option<f64> {
        self.params.remove(key)
    }

    fn overrides(&mut self) -> LimsResult<BTreeMap<usize, f64>> {
        let keys: Vec<String> = self
            .params
            .keys()
            .filter(|k| k.starts_with(OVERRIDE_PREFIX))
            .cloned()
            .collect();
        let mut overrides = BTreeMap::new();
        for key in keys {
            let Ok(input) = key[OVERRIDE_PREFIX.len()..].parse::<usize>() else {
                return Err(ValidationError::UnexpectedAlgorithmParameter {
                    algorithm: self.algorithm.to_string(),
                    parameter: key,
                }
                .into());
            };
            if let Some(value) = self.params.remove(&key) {
                overrides.insert(input, value);
            }
        }
        Ok(overrides)
    }

    fn finish(self) -> LimsResult<()> {
        match self.params.into_keys().next() {
            None => Ok(()),
            Some(parameter) => Err(ValidationError::UnexpectedAlgorithmParameter {
                algorithm: self.algorithm.to_string(),
                parameter,
            }
            .into()),
        }
    }
}

/// An input to pool and its current concentration, if one is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingInput<K> {
    pub input: K,
    pub concentration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolComponent<K> {
    pub input: K,
    pub concentration: f64,
    pub volume_nl: f64,
    /// Fraction of the output pool this input represents.
    pub percentage: f64,
    pub flag: Option<PoolingFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingResult<K> {
    /// In input order.
    pub components: Vec<PoolComponent<K>>,
    pub total_volume_nl: f64,
    /// Volume weighted mean concentration of the pool.
    pub estimated_concentration: f64,
}

/// Compute the volume and share of every input. Fails if any input lacks a
/// usable concentration.
pub fn compute_pooling<K>(
    strategy: &PoolingStrategy,
    inputs: &[PoolingInput<K>],
) -> LimsResult<PoolingResult<K>>
where
    K: Clone + Display,
{
    if inputs.is_empty() {
        return Err(ValidationError::NoInputs("pooling").into());
    }
    let concentrations = inputs
        .iter()
        .map(|i| match i.concentration {
            None => Err(MissingDataError::Concentration {
                input: i.input.to_string(),
            }),
            Some(c) if !c.is_finite() || c < 0.0 => Err(MissingDataError::InvalidConcentration {
                input: i.input.to_string(),
                value: c,
            }),
            Some(c) => Ok(c),
        })
        .collect::<Result<Vec<f64>, _>>()?;
    strategy.validate()?;

    let allocations = strategy.allocate(&concentrations)?;
    let percentage_sum: f64 = allocations.iter().map(|a| a.percentage).sum();
    if (percentage_sum - 1.0).abs() > PERCENTAGE_TOLERANCE {
        return Err(ValidationError::PercentagesDoNotSumToOne(percentage_sum).into());
    }

    let total_volume_nl: f64 = allocations.iter().map(|a| a.volume_nl).sum();
    let estimated_concentration = if total_volume_nl > 0.0 {
        allocations
            .iter()
            .zip(&concentrations)
            .map(|(a, c)| a.volume_nl * c)
            .sum::<f64>()
            / total_volume_nl
    } else {
        0.0
    };

    let components = inputs
        .iter()
        .zip(concentrations)
        .zip(allocations)
        .map(|((input, concentration), a)| {
            if let Some(flag) = a.flag {
                debug!("{}: {flag}, {} nL", input.input, a.volume_nl);
            }
            PoolComponent {
                input: input.input.clone(),
                concentration,
                volume_nl: a.volume_nl,
                percentage: a.percentage,
                flag: a.flag,
            }
        })
        .collect();

    Ok(PoolingResult {
        components,
        total_volume_nl,
        estimated_concentration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use lims_types::LimsError;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn inputs(concentrations: &[f64]) -> Vec<PoolingInput<usize>> {
        concentrations
            .iter()
            .enumerate()
            .map(|(i, &c)| PoolingInput {
                input: i,
                concentration: Some(c),
            })
            .collect()
    }

    #[test]
    fn test_equal_volume() {
        let strategy = PoolingStrategy::EqualVolume(EqualVolumeParams {
            volume_nl: 200.0,
            average_fragment_size_bp: Some(500.0),
        });
        let result = compute_pooling(&strategy, &inputs(&[1.0, 2.0, 3.0, 6.0])).unwrap();
        assert!(result.components.iter().all(|c| c.volume_nl == 200.0));
        assert!(result.components.iter().all(|c| c.percentage == 0.25));
        assert_eq!(result.total_volume_nl, 800.0);
        assert_approx_eq!(result.estimated_concentration, 3.0);
    }

    #[test]
    fn test_minimum_volume_floor_concentration() {
        let strategy = PoolingStrategy::MinimumVolume(MinimumVolumeParams {
            total_quantity_ng: 1000.0,
            floor_concentration: 16.0,
            floor_volume_nl: 2.0,
        });
        let result = compute_pooling(&strategy, &inputs(&[8.0, 20.0, 40.0, 0.0])).unwrap();
        let volumes: Vec<_> = result.components.iter().map(|c| c.volume_nl).collect();
        assert_eq!(volumes, vec![2.0, 12500.0, 6250.0, 2.0]);
        assert_eq!(
            result.components[0].flag,
            Some(PoolingFlag::FloorConcentration)
        );
        assert_eq!(result.components[1].flag, None);
        assert_approx_eq!(
            result.components[1].percentage,
            12500.0 / (2.0 + 12500.0 + 6250.0 + 2.0)
        );
    }

    #[test]
    fn test_minimum_volume_floor_volume() {
        let strategy = PoolingStrategy::MinimumVolume(MinimumVolumeParams {
            total_quantity_ng: 10.0,
            floor_concentration: 1.0,
            floor_volume_nl: 100.0,
        });
        let result = compute_pooling(&strategy, &inputs(&[1000.0, 10.0])).unwrap();
        assert_eq!(result.components[0].volume_nl, 100.0);
        assert_eq!(result.components[0].flag, Some(PoolingFlag::FloorVolume));
        assert_eq!(result.components[1].volume_nl, 500.0);
    }

    #[test]
    fn test_pool_of_pools() {
        let strategy = PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 1000.0,
            overrides: BTreeMap::new(),
        });
        let result = compute_pooling(&strategy, &inputs(&[5.0, 10.0])).unwrap();
        assert_eq!(result.components[0].percentage, 0.5);
        assert_eq!(result.components[1].volume_nl, 500.0);

        let strategy = PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 1000.0,
            overrides: [(0, 0.5)].into_iter().collect(),
        });
        let result = compute_pooling(&strategy, &inputs(&[5.0, 10.0, 1.0])).unwrap();
        let pct: Vec<_> = result.components.iter().map(|c| c.percentage).collect();
        assert_eq!(pct, vec![0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_pool_of_pools_bad_overrides() {
        let strategy = PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 1000.0,
            overrides: [(0, 0.3), (1, 0.3)].into_iter().collect(),
        });
        assert!(matches!(
            compute_pooling(&strategy, &inputs(&[5.0, 10.0])).unwrap_err(),
            LimsError::Validation(ValidationError::PercentagesDoNotSumToOne(_))
        ));
        let strategy = PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 1000.0,
            overrides: [(0, 0.8), (1, 0.8)].into_iter().collect(),
        });
        assert!(compute_pooling(&strategy, &inputs(&[5.0, 10.0, 1.0])).is_err());
        let strategy = PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 1000.0,
            overrides: [(5, 0.1)].into_iter().collect(),
        });
        assert!(compute_pooling(&strategy, &inputs(&[5.0, 10.0])).is_err());
    }

    #[test]
    fn test_missing_concentrations() {
        let strategy = PoolingStrategy::EqualVolume(EqualVolumeParams {
            volume_nl: 1.0,
            average_fragment_size_bp: None,
        });
        let mut missing = inputs(&[1.0, 2.0]);
        missing[1].concentration = None;
        assert_eq!(
            compute_pooling(&strategy, &missing).unwrap_err(),
            MissingDataError::Concentration {
                input: "1".to_string()
            }
            .into()
        );
        assert_eq!(
            compute_pooling(&strategy, &inputs(&[-0.5])).unwrap_err(),
            MissingDataError::InvalidConcentration {
                input: "0".to_string(),
                value: -0.5
            }
            .into()
        );
        assert!(matches!(
            compute_pooling::<usize>(&strategy, &[]).unwrap_err(),
            LimsError::Validation(ValidationError::NoInputs(_))
        ));
    }

    #[test]
    fn test_flat_parameters() {
        let strategy = PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 1000.0,
            overrides: [(2, 0.5)].into_iter().collect(),
        });
        let (name, flat) = strategy.to_flat();
        assert_eq!(name, "pool_of_pools");
        assert_eq!(
            flat.keys().collect::<Vec<_>>(),
            vec!["override.2", "total_volume_nl"]
        );
        assert_eq!(PoolingStrategy::from_flat(&name, &flat).unwrap(), strategy);

        let mut flat = BTreeMap::new();
        flat.insert("volume_nl".to_string(), 10.0);
        flat.insert("floor_volume_nl".to_string(), 10.0);
        assert!(matches!(
            PoolingStrategy::from_flat("equal_volume", &flat).unwrap_err(),
            LimsError::Validation(ValidationError::UnexpectedAlgorithmParameter { .. })
        ));
        assert!(matches!(
            PoolingStrategy::from_flat("minimum_volume", &flat).unwrap_err(),
            LimsError::Validation(ValidationError::MissingAlgorithmParameter {
                parameter: "total_quantity_ng",
                ..
            })
        ));
        assert!(matches!(
            PoolingStrategy::from_flat("by_mood", &flat).unwrap_err(),
            LimsError::Validation(ValidationError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_strategy_json_tag() {
        let strategy = PoolingStrategy::MinimumVolume(MinimumVolumeParams {
            total_quantity_ng: 1.0,
            floor_concentration: 2.0,
            floor_volume_nl: 3.0,
        });
        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["algorithm"], "minimum_volume");
        assert_eq!(
            serde_json::from_value::<PoolingStrategy>(json).unwrap(),
            strategy
        );
        assert!(!strategy.combines_pools());
        assert!(PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 50.0,
            overrides: BTreeMap::new(),
        })
        .combines_pools());
    }

    fn strategy_strategy() -> impl Strategy<Value = PoolingStrategy> {
        prop_oneof![
            (0.1f64..1000.0).prop_map(|volume_nl| PoolingStrategy::EqualVolume(EqualVolumeParams {
                volume_nl,
                average_fragment_size_bp: None,
            })),
            (0.1f64..1e4, 0.1f64..50.0, 0.1f64..100.0).prop_map(|(q, c, v)| {
                PoolingStrategy::MinimumVolume(MinimumVolumeParams {
                    total_quantity_ng: q,
                    floor_concentration: c,
                    floor_volume_nl: v,
                })
            }),
            (0.1f64..1e5).prop_map(|total_volume_nl| PoolingStrategy::PoolOfPools(
                PoolOfPoolsParams {
                    total_volume_nl,
                    overrides: BTreeMap::new(),
                }
            )),
        ]
    }

    proptest! {
        #[test]
        fn prop_pooling_invariants(
            strategy in strategy_strategy(),
            concentrations in proptest::collection::vec(0.0f64..200.0, 1..96),
        ) {
            let inputs = inputs(&concentrations);
            let result = compute_pooling(&strategy, &inputs).unwrap();
            let sum: f64 = result.components.iter().map(|c| c.percentage).sum();
            prop_assert!((sum - 1.0).abs() <= PERCENTAGE_TOLERANCE);
            prop_assert!(result.components.iter().all(|c| c.volume_nl >= 0.0));
            prop_assert_eq!(compute_pooling(&strategy, &inputs).unwrap(), result);
        }
    }
}
