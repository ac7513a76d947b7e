use serde::{Deserialize, Serialize};

use crate::allocator::AllocationPolicy;
use crate::constants::MIN_GROWTH_FRACTION;
use crate::value::StatePath;

/// When a cell divides, measured on [`SimConfig::division_variable`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DivisionThreshold {
    /// Divide once the variable reaches `value`.
    Fixed { value: f64 },
    /// Sampled once at birth as `birth value + expected_increase * N(1, scale)`.
    /// Without an expected increase the cell divides around doubling its
    /// birth value.
    MassDistribution {
        #[serde(default)]
        expected_increase: Option<f64>,
        scale: f64,
    },
}

impl Default for DivisionThreshold {
    fn default() -> Self {
        DivisionThreshold::MassDistribution {
            expected_increase: None,
            scale: 0.1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Deterministic seed for reproducible runs; daughters derive theirs from it.
    pub seed: u64,
    /// Identity of the simulated cell. Daughters append `0` / `1`.
    pub agent_id: String,
    /// Timestep handed to processes (seconds of model time).
    pub timestep: f64,
    /// How contested bulk requests are resolved.
    pub allocation_policy: AllocationPolicy,
    /// Run REQUEST and EVOLVE phases on the rayon pool.
    pub parallel: bool,
    /// Check the division threshold after every step.
    pub divide: bool,
    /// State path compared against the division threshold.
    pub division_variable: StatePath,
    pub division_threshold: DivisionThreshold,
    /// Collection holding the chromosome domain tree used by lineage dividers.
    pub domain_collection: String,
    /// Fractional growth of a unique collection's arena when it runs out of
    /// free rows. Never below [`MIN_GROWTH_FRACTION`].
    pub unique_growth_fraction: f64,
    /// Record an emit frame every this many steps.
    pub emit_every: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            agent_id: "0".to_string(),
            timestep: 1.0,
            allocation_policy: AllocationPolicy::default(),
            parallel: false,
            divide: false,
            division_variable: StatePath::from("listeners/mass/dry_mass"),
            division_threshold: DivisionThreshold::default(),
            domain_collection: "chromosome_domain".to_string(),
            unique_growth_fraction: MIN_GROWTH_FRACTION,
            emit_every: 1,
        }
    }
}

/// Declares a config error enum whose `Display` text sits next to each
/// variant. Message arguments may name the variant's fields inline.
macro_rules! define_config_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $variant:ident $( { $($field:ident : $type:ty),* $(,)? } )?
                    => $fmt:literal $(, $arg:expr)*;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis enum $name {
            $( $variant $( { $($field: $type),* } )?, )*
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( Self::$variant $( { $($field),* } )? => write!(f, $fmt $(, $arg)*), )*
                }
            }
        }

        impl std::error::Error for $name {}
    };
}

define_config_error! {
    /// Reason a [`SimConfig`] was rejected by [`SimConfig::validate`].
    pub enum SimConfigError {
        EmptyAgentId => "agent_id must not be empty";
        InvalidTimestep => "timestep must be positive and finite";
        InvalidUniqueGrowthFraction { value: f64 }
            => "unique_growth_fraction ({value}) must be finite and at least {}", MIN_GROWTH_FRACTION;
        InvalidEmitEvery => "emit_every must be positive";
        EmptyDivisionVariable => "division_variable must name a state path when divide is enabled";
        EmptyDomainCollection => "domain_collection must not be empty";
        InvalidDivisionThreshold { value: f64 } => "division threshold ({value}) must be finite";
        InvalidDivisionScale { scale: f64 }
            => "division threshold scale ({scale}) must be finite and non-negative";
        InvalidExpectedIncrease { value: f64 }
            => "division threshold expected_increase ({value}) must be finite and positive";
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), SimConfigError> {
        self.validate_run()?;
        self.validate_store()?;
        self.validate_division()?;
        Ok(())
    }

    fn validate_run(&self) -> Result<(), SimConfigError> {
        if self.agent_id.is_empty() {
            return Err(SimConfigError::EmptyAgentId);
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(SimConfigError::InvalidTimestep);
        }
        if self.emit_every == 0 {
            return Err(SimConfigError::InvalidEmitEvery);
        }
        Ok(())
    }

    fn validate_store(&self) -> Result<(), SimConfigError> {
        let value = self.unique_growth_fraction;
        if !(value.is_finite() && value >= MIN_GROWTH_FRACTION) {
            return Err(SimConfigError::InvalidUniqueGrowthFraction { value });
        }
        if self.domain_collection.is_empty() {
            return Err(SimConfigError::EmptyDomainCollection);
        }
        Ok(())
    }

    fn validate_division(&self) -> Result<(), SimConfigError> {
        if self.divide && self.division_variable.is_empty() {
            return Err(SimConfigError::EmptyDivisionVariable);
        }
        match self.division_threshold {
            DivisionThreshold::Fixed { value } if !value.is_finite() => {
                Err(SimConfigError::InvalidDivisionThreshold { value })
            }
            DivisionThreshold::MassDistribution { scale, .. }
                if !(scale.is_finite() && scale >= 0.0) =>
            {
                Err(SimConfigError::InvalidDivisionScale { scale })
            }
            DivisionThreshold::MassDistribution {
                expected_increase: Some(value),
                ..
            } if !(value.is_finite() && value > 0.0) => {
                Err(SimConfigError::InvalidExpectedIncrease { value })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_default() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_invalid_timestep() {
        for timestep in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = SimConfig {
                timestep,
                ..SimConfig::default()
            };
            assert_eq!(config.validate(), Err(SimConfigError::InvalidTimestep));
        }
    }

    #[test]
    fn validate_rejects_empty_division_variable_only_when_dividing() {
        let config = SimConfig {
            division_variable: StatePath::from(""),
            ..SimConfig::default()
        };
        assert!(config.validate().is_ok());
        let config = SimConfig {
            divide: true,
            ..config
        };
        assert_eq!(
            config.validate(),
            Err(SimConfigError::EmptyDivisionVariable)
        );
    }

    #[test]
    fn validate_rejects_bad_thresholds() {
        let config = SimConfig {
            division_threshold: DivisionThreshold::MassDistribution {
                expected_increase: Some(-3.0),
                scale: 0.1,
            },
            ..SimConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimConfigError::InvalidExpectedIncrease { .. })
        ));
        let config = SimConfig {
            division_threshold: DivisionThreshold::MassDistribution {
                expected_increase: None,
                scale: -0.1,
            },
            ..SimConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimConfigError::InvalidDivisionScale { .. })
        ));
    }

    #[test]
    fn validate_rejects_growth_below_ten_percent() {
        for value in [0.0, 0.05, -1.0, f64::NAN] {
            let config = SimConfig {
                unique_growth_fraction: value,
                ..SimConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(SimConfigError::InvalidUniqueGrowthFraction { .. })
            ));
        }
        let config = SimConfig {
            unique_growth_fraction: 0.25,
            ..SimConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_deserializes_with_defaults() {
        let json = r#"{
            "seed": 42,
            "divide": true,
            "division_threshold": { "kind": "fixed", "value": 850.0 },
            "allocation_policy": "proportional"
        }"#;
        let cfg: SimConfig = serde_json::from_str(json).expect("partial config should parse");
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.division_threshold, DivisionThreshold::Fixed { value: 850.0 });
        assert_eq!(cfg.allocation_policy, AllocationPolicy::Proportional);
        assert_eq!(cfg.agent_id, "0");
        assert_eq!(cfg.division_variable, StatePath::from("listeners/mass/dry_mass"));
        assert_eq!(cfg.emit_every, 1);
        assert!(!cfg.parallel);
    }

    #[test]
    fn json_round_trip_preserves_config() {
        let cfg = SimConfig {
            seed: 9,
            parallel: true,
            division_threshold: DivisionThreshold::MassDistribution {
                expected_increase: Some(400.0),
                scale: 0.05,
            },
            ..SimConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn deserialize_rejects_unknown_allocation_policy() {
        let result = serde_json::from_str::<SimConfig>(r#"{"allocation_policy": "lottery"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn error_messages_are_stable() {
        let cases = [
            (SimConfigError::EmptyAgentId, "agent_id must not be empty"),
            (
                SimConfigError::InvalidEmitEvery,
                "emit_every must be positive",
            ),
            (
                SimConfigError::InvalidDivisionThreshold {
                    value: f64::INFINITY,
                },
                "division threshold (inf) must be finite",
            ),
            (
                SimConfigError::InvalidUniqueGrowthFraction { value: 0.05 },
                "unique_growth_fraction (0.05) must be finite and at least 0.1",
            ),
            (
                SimConfigError::InvalidDivisionScale { scale: -0.5 },
                "division threshold scale (-0.5) must be finite and non-negative",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }
}
