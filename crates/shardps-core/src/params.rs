//! Configuration types for parameter initialization.
//!
//! This module provides the following types:
//!
//! - [`InitializerConfig`]: How a dense tensor or a lazily created sparse row
//!   is filled when it is first materialized.
//!
//! Initializers are persisted alongside sparse stores as an `i32` kind code
//! and two `f32` parameters, see [`InitializerConfig::to_code`].

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Configuration for weight initialization.
///
/// # Example
///
/// ```
/// use shardps_core::params::InitializerConfig;
///
/// let config: InitializerConfig =
///     serde_json::from_str(r#"{"type": "random_uniform", "min": -0.1, "max": 0.1}"#).unwrap();
/// assert_eq!(config, InitializerConfig::uniform(-0.1, 0.1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitializerConfig {
    /// Initialize all weights to zero.
    Zeros,

    /// Initialize all weights to one.
    Ones,

    /// Initialize all weights to a constant value.
    Constant {
        /// The constant value to use.
        value: f32,
    },

    /// Initialize weights with uniform random values in `[min, max)`.
    RandomUniform {
        /// The minimum value.
        min: f32,
        /// The maximum value.
        max: f32,
    },

    /// Initialize weights with normal (Gaussian) random values.
    RandomNormal {
        /// The mean of the distribution.
        mean: f32,
        /// The standard deviation of the distribution.
        stddev: f32,
    },

    /// Variance scaling, scale 1, fan-in, uniform.
    LecunUniform,

    /// Variance scaling, scale 1, fan-in, truncated normal.
    LecunNormal,

    /// Variance scaling, scale 1, fan-average, uniform.
    XavierUniform,

    /// Variance scaling, scale 1, fan-average, truncated normal.
    XavierNormal,

    /// Variance scaling, scale 2, fan-in, uniform.
    HeUniform,

    /// Variance scaling, scale 2, fan-in, truncated normal.
    HeNormal,

    /// Uniform random integers in `[min, max]`, stored as floats.
    RandomInt {
        /// The minimum value (inclusive).
        min: i32,
        /// The maximum value (inclusive).
        max: i32,
    },

    /// Fill with `0, 1, 2, ...` in row-major order.
    Arange,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        InitializerConfig::Zeros
    }
}

impl InitializerConfig {
    /// Creates a zeros initializer.
    pub fn zeros() -> Self {
        InitializerConfig::Zeros
    }

    /// Creates a ones initializer.
    pub fn ones() -> Self {
        InitializerConfig::Ones
    }

    /// Creates a constant initializer.
    pub fn constant(value: f32) -> Self {
        InitializerConfig::Constant { value }
    }

    /// Creates a uniform random initializer.
    pub fn uniform(min: f32, max: f32) -> Self {
        InitializerConfig::RandomUniform { min, max }
    }

    /// Creates a normal random initializer.
    pub fn normal(mean: f32, stddev: f32) -> Self {
        InitializerConfig::RandomNormal { mean, stddev }
    }

    /// Validates the initializer parameters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigValidation`] for a uniform or integer range
    /// with `min > max`, a negative or non-finite standard deviation, or a
    /// non-finite constant.
    pub fn validate(&self) -> Result<()> {
        match *self {
            InitializerConfig::Constant { value } if !value.is_finite() => Err(
                CoreError::config(format!("Constant value ({}) must be finite", value)),
            ),
            InitializerConfig::RandomUniform { min, max } => {
                if !(min.is_finite() && max.is_finite()) || min > max {
                    return Err(CoreError::config(format!(
                        "RandomUniform min ({}) must not exceed max ({})",
                        min, max
                    )));
                }
                Ok(())
            }
            InitializerConfig::RandomNormal { mean, stddev } => {
                if !mean.is_finite() || !stddev.is_finite() || stddev < 0.0 {
                    return Err(CoreError::config(format!(
                        "RandomNormal stddev ({}) must be non-negative",
                        stddev
                    )));
                }
                Ok(())
            }
            InitializerConfig::RandomInt { min, max } if min > max => Err(CoreError::config(
                format!("RandomInt min ({}) must not exceed max ({})", min, max),
            )),
            _ => Ok(()),
        }
    }

    /// Returns `true` for the variance scaling kinds, which need a rank-2 shape.
    pub fn is_variance_scaling(&self) -> bool {
        matches!(
            self,
            InitializerConfig::LecunUniform
                | InitializerConfig::LecunNormal
                | InitializerConfig::XavierUniform
                | InitializerConfig::XavierNormal
                | InitializerConfig::HeUniform
                | InitializerConfig::HeNormal
        )
    }

    /// Returns `true` if the initializer may be used for sparse rows.
    ///
    /// Sparse rows only support the element-wise kinds.
    pub fn is_row_compatible(&self) -> bool {
        matches!(
            self,
            InitializerConfig::Zeros
                | InitializerConfig::Ones
                | InitializerConfig::Constant { .. }
                | InitializerConfig::RandomUniform { .. }
                | InitializerConfig::RandomNormal { .. }
        )
    }

    /// Returns the persisted `(kind, param1, param2)` triple.
    pub fn to_code(&self) -> (i32, f32, f32) {
        match *self {
            InitializerConfig::Zeros => (1, 0.0, 0.0),
            InitializerConfig::Ones => (2, 0.0, 0.0),
            InitializerConfig::Constant { value } => (3, value, 0.0),
            InitializerConfig::RandomUniform { min, max } => (10, min, max),
            InitializerConfig::RandomNormal { mean, stddev } => (11, mean, stddev),
            InitializerConfig::LecunUniform => (12, 0.0, 0.0),
            InitializerConfig::LecunNormal => (13, 0.0, 0.0),
            InitializerConfig::XavierUniform => (14, 0.0, 0.0),
            InitializerConfig::XavierNormal => (15, 0.0, 0.0),
            InitializerConfig::HeUniform => (16, 0.0, 0.0),
            InitializerConfig::HeNormal => (17, 0.0, 0.0),
            InitializerConfig::RandomInt { min, max } => (18, min as f32, max as f32),
            InitializerConfig::Arange => (19, 0.0, 0.0),
        }
    }

    /// Rebuilds an initializer from its persisted triple.
    ///
    /// Kind `0` means "no initializer" and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTag`] for an unrecognized kind and
    /// [`CoreError::ConfigValidation`] if the parameters fail [`validate`].
    ///
    /// [`validate`]: InitializerConfig::validate
    pub fn from_code(kind: i32, param1: f32, param2: f32) -> Result<Option<Self>> {
        let config = match kind {
            0 => return Ok(None),
            1 => InitializerConfig::Zeros,
            2 => InitializerConfig::Ones,
            3 => InitializerConfig::Constant { value: param1 },
            10 => InitializerConfig::RandomUniform {
                min: param1,
                max: param2,
            },
            11 => InitializerConfig::RandomNormal {
                mean: param1,
                stddev: param2,
            },
            12 => InitializerConfig::LecunUniform,
            13 => InitializerConfig::LecunNormal,
            14 => InitializerConfig::XavierUniform,
            15 => InitializerConfig::XavierNormal,
            16 => InitializerConfig::HeUniform,
            17 => InitializerConfig::HeNormal,
            18 => InitializerConfig::RandomInt {
                min: int_param(param1)?,
                max: int_param(param2)?,
            },
            19 => InitializerConfig::Arange,
            other => {
                return Err(CoreError::UnknownTag {
                    kind: "initializer",
                    tag: i64::from(other),
                })
            }
        };
        config.validate()?;
        Ok(Some(config))
    }
}

/// Persisted `random_int` bounds must be whole numbers within `i32`.
fn int_param(value: f32) -> Result<i32> {
    // 2^31 is exact in f32; i32::MAX is not.
    const LIMIT: f32 = 2_147_483_648.0;
    if value.fract() == 0.0 && (-LIMIT..LIMIT).contains(&value) {
        return Ok(value as i32);
    }
    Err(CoreError::invalid(format!("random_int bound {}", value)))
}
