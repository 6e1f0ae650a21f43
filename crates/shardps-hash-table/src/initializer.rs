//! Parameter initializers for dense tensors and sparse rows.
//!
//! This module provides the initialization strategies applied when a dense
//! tensor is first allocated or a sparse row is first materialized.
//!
//! # Overview
//!
//! The main components are:
//!
//! - [`Initializer`] - The core trait defining the interface for initializers
//! - [`ZerosInitializer`] - Initialize all values to zero
//! - [`OnesInitializer`] - Initialize all values to one
//! - [`ConstantInitializer`] - Initialize to a constant value
//! - [`RandomUniformInitializer`] - Initialize with uniform random values
//! - [`RandomNormalInitializer`] - Initialize with normal distribution values
//! - [`VarianceScalingInitializer`] - Lecun, Xavier and He initialization
//! - [`RandomIntInitializer`] - Initialize with uniform random integers
//! - [`ArangeInitializer`] - Initialize to `0, 1, 2, ...`
//! - [`InitializerFactory`] - Factory for creating initializers from config
//!
//! Randomness always comes from a caller-supplied engine, so a seeded
//! [`rand::rngs::StdRng`] reproduces the same parameters.
//!
//! # Example
//!
//! ```
//! use rand::{rngs::StdRng, SeedableRng};
//! use shardps_hash_table::initializer::{Initializer, RandomUniformInitializer};
//! use shardps_tensor::Shape;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let initializer = RandomUniformInitializer::new(-0.05, 0.05);
//! let values = initializer.initialize(&mut rng, &Shape::vector(64)).unwrap();
//! assert_eq!(values.len(), 64);
//! ```

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use shardps_core::params::InitializerConfig;
use shardps_tensor::{DenseTensor, Shape};

use crate::error::{HashTableError, Result};

/// A trait for parameter initializers.
///
/// # Thread Safety
///
/// All initializers must be `Send + Sync` to allow use in concurrent contexts.
///
/// # Example
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use shardps_hash_table::initializer::{Initializer, ZerosInitializer};
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let row = ZerosInitializer.initialize_row(&mut rng, 4);
/// assert_eq!(row, vec![0.0, 0.0, 0.0, 0.0]);
/// ```
pub trait Initializer: Send + Sync {
    /// Fills `out`, whose length is `shape.total_dim()`, in row-major order.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::UnsupportedInitializer`] if the initializer
    /// cannot be applied to `shape`.
    fn fill(&self, rng: &mut dyn RngCore, shape: &Shape, out: &mut [f32]) -> Result<()>;

    /// Returns the name of this initializer.
    fn name(&self) -> &'static str;

    /// Returns `true` if the initializer may produce sparse rows.
    fn supports_rows(&self) -> bool {
        true
    }

    /// Creates `shape.total_dim()` values.
    fn initialize(&self, rng: &mut dyn RngCore, shape: &Shape) -> Result<Vec<f32>> {
        let mut values = vec![0.0; shape.total_dim()];
        self.fill(rng, shape, &mut values)?;
        Ok(values)
    }

    /// Creates one sparse row of `dim` values.
    ///
    /// Row initializers are element-wise, so this cannot fail for any
    /// initializer whose [`supports_rows`](Self::supports_rows) is `true`.
    /// Other initializers produce zeros.
    fn initialize_row(&self, rng: &mut dyn RngCore, dim: usize) -> Vec<f32> {
        let mut values = vec![0.0; dim];
        if self.supports_rows() {
            let filled = i32::try_from(dim)
                .ok()
                .and_then(|d| Shape::try_new(vec![d]).ok())
                .map(|shape| self.fill(rng, &shape, &mut values));
            if !matches!(filled, Some(Ok(()))) {
                values.fill(0.0);
            }
        }
        values
    }
}

/// Initializer that sets all values to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZerosInitializer;

impl Initializer for ZerosInitializer {
    fn fill(&self, _rng: &mut dyn RngCore, _shape: &Shape, out: &mut [f32]) -> Result<()> {
        out.fill(0.0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "zeros"
    }
}

/// Initializer that sets all values to one.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnesInitializer;

impl Initializer for OnesInitializer {
    fn fill(&self, _rng: &mut dyn RngCore, _shape: &Shape, out: &mut [f32]) -> Result<()> {
        out.fill(1.0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ones"
    }
}

/// Initializer that sets all values to a constant.
///
/// # Example
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use shardps_hash_table::initializer::{ConstantInitializer, Initializer};
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let row = ConstantInitializer::new(0.5).initialize_row(&mut rng, 3);
/// assert_eq!(row, vec![0.5, 0.5, 0.5]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantInitializer {
    /// The constant value to use for initialization.
    value: f32,
}

impl ConstantInitializer {
    /// Creates a new constant initializer with the given value.
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    /// Returns the constant value.
    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Initializer for ConstantInitializer {
    fn fill(&self, _rng: &mut dyn RngCore, _shape: &Shape, out: &mut [f32]) -> Result<()> {
        out.fill(self.value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "constant"
    }
}

/// Initializer that samples from a uniform distribution.
///
/// Values are sampled uniformly from `[min_val, max_val)`. A degenerate range
/// with `min_val == max_val` yields that value.
#[derive(Debug, Clone, Copy)]
pub struct RandomUniformInitializer {
    /// The minimum value (inclusive).
    min_val: f32,
    /// The maximum value (exclusive).
    max_val: f32,
}

impl RandomUniformInitializer {
    /// Creates a new uniform random initializer.
    ///
    /// # Arguments
    ///
    /// * `min_val` - The minimum value (inclusive)
    /// * `max_val` - The maximum value (exclusive)
    ///
    /// # Panics
    ///
    /// Panics if `min_val > max_val`. Validate an [`InitializerConfig`] first
    /// when the range comes from configuration.
    pub fn new(min_val: f32, max_val: f32) -> Self {
        assert!(
            min_val <= max_val,
            "min_val ({}) must not exceed max_val ({})",
            min_val,
            max_val
        );
        Self { min_val, max_val }
    }

    /// Returns the minimum value.
    pub fn min_val(&self) -> f32 {
        self.min_val
    }

    /// Returns the maximum value.
    pub fn max_val(&self) -> f32 {
        self.max_val
    }
}

impl Initializer for RandomUniformInitializer {
    fn fill(&self, rng: &mut dyn RngCore, _shape: &Shape, out: &mut [f32]) -> Result<()> {
        fill_uniform(rng, self.min_val, self.max_val, out);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "random_uniform"
    }
}

/// Initializer that samples from a normal (Gaussian) distribution.
#[derive(Debug, Clone, Copy)]
pub struct RandomNormalInitializer {
    /// The mean of the distribution.
    mean: f32,
    /// The standard deviation of the distribution.
    stddev: f32,
}

impl RandomNormalInitializer {
    /// Creates a new normal random initializer.
    ///
    /// # Panics
    ///
    /// Panics if `stddev` is negative or not finite.
    pub fn new(mean: f32, stddev: f32) -> Self {
        assert!(
            stddev.is_finite() && stddev >= 0.0,
            "stddev ({}) must be non-negative",
            stddev
        );
        Self { mean, stddev }
    }

    /// Returns the mean.
    pub fn mean(&self) -> f32 {
        self.mean
    }

    /// Returns the standard deviation.
    pub fn stddev(&self) -> f32 {
        self.stddev
    }
}

impl Initializer for RandomNormalInitializer {
    fn fill(&self, rng: &mut dyn RngCore, _shape: &Shape, out: &mut [f32]) -> Result<()> {
        let normal = normal(self.name(), self.mean, self.stddev)?;
        for v in out.iter_mut() {
            *v = normal.sample(rng) as f32;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "random_normal"
    }
}

/// How the variance scaling fan is computed from a `(dim0, dim1)` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    /// `n = dim0`.
    FanIn,
    /// `n = dim1`.
    FanOut,
    /// `n = (dim0 + dim1) / 2`.
    FanAvg,
}

/// Distribution sampled by [`VarianceScalingInitializer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceDistribution {
    /// Uniform in `[-limit, limit)` with `limit = sqrt(3 * scale / n)`.
    Uniform,
    /// Normal truncated at two standard deviations, `stddev = sqrt(scale / n)`.
    TruncatedNormal,
}

/// Variance scaling initializer for rank-2 weights.
///
/// Lecun, Xavier and He initialization are the presets
/// [`lecun`](Self::lecun), [`xavier`](Self::xavier) and [`he`](Self::he).
///
/// # Example
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use shardps_hash_table::initializer::{Initializer, VarianceDistribution, VarianceScalingInitializer};
/// use shardps_tensor::Shape;
///
/// let mut rng = StdRng::seed_from_u64(1);
/// let he = VarianceScalingInitializer::he(VarianceDistribution::Uniform);
/// // limit = sqrt(3 * 2 / 6) = 1
/// let w = he.initialize(&mut rng, &Shape::matrix(6, 4)).unwrap();
/// assert!(w.iter().all(|v| v.abs() <= 1.0));
///
/// assert!(he.initialize(&mut rng, &Shape::vector(4)).is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct VarianceScalingInitializer {
    scale: f32,
    mode: FanMode,
    distribution: VarianceDistribution,
}

impl VarianceScalingInitializer {
    /// Creates a variance scaling initializer.
    pub fn new(scale: f32, mode: FanMode, distribution: VarianceDistribution) -> Self {
        Self {
            scale,
            mode,
            distribution,
        }
    }

    /// Scale 1, fan-in.
    pub fn lecun(distribution: VarianceDistribution) -> Self {
        Self::new(1.0, FanMode::FanIn, distribution)
    }

    /// Scale 1, fan-average.
    pub fn xavier(distribution: VarianceDistribution) -> Self {
        Self::new(1.0, FanMode::FanAvg, distribution)
    }

    /// Scale 2, fan-in.
    pub fn he(distribution: VarianceDistribution) -> Self {
        Self::new(2.0, FanMode::FanIn, distribution)
    }

    /// Returns the scale.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Returns the fan mode.
    pub fn mode(&self) -> FanMode {
        self.mode
    }

    fn fan(&self, shape: &Shape) -> Result<f32> {
        if shape.rank() != 2 {
            return Err(HashTableError::UnsupportedInitializer {
                initializer: self.name(),
                message: format!("requires a rank-2 shape, got {}", shape),
            });
        }
        let (d0, d1) = (shape.dim(0) as f32, shape.dim(1) as f32);
        Ok(match self.mode {
            FanMode::FanIn => d0,
            FanMode::FanOut => d1,
            FanMode::FanAvg => (d0 + d1) / 2.0,
        })
    }
}

impl Initializer for VarianceScalingInitializer {
    fn fill(&self, rng: &mut dyn RngCore, shape: &Shape, out: &mut [f32]) -> Result<()> {
        let n = self.fan(shape)?;
        if out.is_empty() {
            return Ok(());
        }
        match self.distribution {
            VarianceDistribution::Uniform => {
                let limit = (3.0 * self.scale / n).sqrt();
                fill_uniform(rng, -limit, limit, out);
            }
            VarianceDistribution::TruncatedNormal => {
                let stddev = (self.scale / n).sqrt();
                let normal = normal(self.name(), 0.0, stddev)?;
                let bound = 2.0 * stddev;
                for v in out.iter_mut() {
                    *v = loop {
                        let sample = normal.sample(rng) as f32;
                        if sample.abs() <= bound {
                            break sample;
                        }
                    };
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "variance_scaling"
    }

    fn supports_rows(&self) -> bool {
        false
    }
}

/// Initializer that samples integers uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct RandomIntInitializer {
    min: i32,
    max: i32,
}

impl RandomIntInitializer {
    /// Creates a random integer initializer.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn new(min: i32, max: i32) -> Self {
        assert!(min <= max, "min ({}) must not exceed max ({})", min, max);
        Self { min, max }
    }
}

impl Initializer for RandomIntInitializer {
    fn fill(&self, rng: &mut dyn RngCore, _shape: &Shape, out: &mut [f32]) -> Result<()> {
        for v in out.iter_mut() {
            *v = rng.gen_range(self.min..=self.max) as f32;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "random_int"
    }

    fn supports_rows(&self) -> bool {
        false
    }
}

/// Initializer that writes `0, 1, 2, ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArangeInitializer;

impl Initializer for ArangeInitializer {
    fn fill(&self, _rng: &mut dyn RngCore, _shape: &Shape, out: &mut [f32]) -> Result<()> {
        for (i, v) in out.iter_mut().enumerate() {
            *v = i as f32;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "arange"
    }

    fn supports_rows(&self) -> bool {
        false
    }
}

fn fill_uniform(rng: &mut dyn RngCore, min: f32, max: f32, out: &mut [f32]) {
    if min >= max {
        out.fill(min);
        return;
    }
    for v in out.iter_mut() {
        *v = rng.gen_range(min..max);
    }
}

fn normal(initializer: &'static str, mean: f32, stddev: f32) -> Result<Normal<f64>> {
    Normal::new(f64::from(mean), f64::from(stddev)).map_err(|e| {
        HashTableError::UnsupportedInitializer {
            initializer,
            message: e.to_string(),
        }
    })
}

/// Factory for creating initializers from configuration.
///
/// # Example
///
/// ```
/// use shardps_core::params::InitializerConfig;
/// use shardps_hash_table::initializer::{Initializer, InitializerFactory};
///
/// let config = InitializerConfig::zeros();
/// let initializer = InitializerFactory::create_initializer(&config).unwrap();
/// assert_eq!(initializer.name(), "zeros");
/// ```
pub struct InitializerFactory;

impl InitializerFactory {
    /// Creates an initializer from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::Core`] if the configuration fails validation.
    pub fn create_initializer(config: &InitializerConfig) -> Result<Box<dyn Initializer>> {
        use VarianceDistribution::{TruncatedNormal, Uniform};

        config.validate()?;
        Ok(match *config {
            InitializerConfig::Zeros => Box::new(ZerosInitializer),
            InitializerConfig::Ones => Box::new(OnesInitializer),
            InitializerConfig::Constant { value } => Box::new(ConstantInitializer::new(value)),
            InitializerConfig::RandomUniform { min, max } => {
                Box::new(RandomUniformInitializer::new(min, max))
            }
            InitializerConfig::RandomNormal { mean, stddev } => {
                Box::new(RandomNormalInitializer::new(mean, stddev))
            }
            InitializerConfig::LecunUniform => Box::new(VarianceScalingInitializer::lecun(Uniform)),
            InitializerConfig::LecunNormal => {
                Box::new(VarianceScalingInitializer::lecun(TruncatedNormal))
            }
            InitializerConfig::XavierUniform => {
                Box::new(VarianceScalingInitializer::xavier(Uniform))
            }
            InitializerConfig::XavierNormal => {
                Box::new(VarianceScalingInitializer::xavier(TruncatedNormal))
            }
            InitializerConfig::HeUniform => Box::new(VarianceScalingInitializer::he(Uniform)),
            InitializerConfig::HeNormal => {
                Box::new(VarianceScalingInitializer::he(TruncatedNormal))
            }
            InitializerConfig::RandomInt { min, max } => {
                Box::new(RandomIntInitializer::new(min, max))
            }
            InitializerConfig::Arange => Box::new(ArangeInitializer),
        })
    }
}

/// Fills an owning dense tensor according to `config`.
///
/// # Errors
///
/// Returns [`HashTableError::Tensor`] if `tensor` is a view, and
/// [`HashTableError::UnsupportedInitializer`] for a variance scaling kind on
/// a shape that is not rank 2. The tensor is unchanged on failure.
pub fn rand_init(
    tensor: &mut DenseTensor<'_>,
    rng: &mut dyn RngCore,
    config: &InitializerConfig,
) -> Result<()> {
    let initializer = InitializerFactory::create_initializer(config)?;
    let values = initializer.initialize(rng, tensor.shape())?;
    tensor.as_mut_slice()?.copy_from_slice(&values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_constant_kinds() {
        let mut rng = rng();
        assert_eq!(ZerosInitializer.initialize_row(&mut rng, 3), vec![0.0; 3]);
        assert_eq!(OnesInitializer.initialize_row(&mut rng, 3), vec![1.0; 3]);
        assert_eq!(
            ConstantInitializer::new(0.25).initialize_row(&mut rng, 2),
            vec![0.25, 0.25]
        );
    }

    #[test]
    fn test_random_uniform_range() {
        let mut rng = rng();
        let values = RandomUniformInitializer::new(-0.1, 0.1).initialize_row(&mut rng, 1000);
        assert!(values.iter().all(|&v| (-0.1..0.1).contains(&v)));
        assert!(values.iter().any(|&v| v != values[0]));

        let fixed = RandomUniformInitializer::new(0.5, 0.5).initialize_row(&mut rng, 4);
        assert_eq!(fixed, vec![0.5; 4]);
    }

    #[test]
    #[should_panic(expected = "min_val")]
    fn test_random_uniform_invalid_range() {
        RandomUniformInitializer::new(0.1, -0.1);
    }

    #[test]
    fn test_random_normal_mean() {
        let mut rng = rng();
        let values = RandomNormalInitializer::new(1.0, 0.1).initialize_row(&mut rng, 2000);
        let mean: f32 = values.iter().sum::<f32>() / values.len() as f32;
        assert!((mean - 1.0).abs() < 0.02, "mean {} too far from 1", mean);
    }

    #[test]
    fn test_seeded_engine_reproducible() {
        let init = RandomNormalInitializer::new(0.0, 1.0);
        let a = init.initialize_row(&mut StdRng::seed_from_u64(9), 16);
        let b = init.initialize_row(&mut StdRng::seed_from_u64(9), 16);
        assert_eq!(a, b);
    }

    #[test]
    fn test_variance_scaling_bounds() {
        let mut rng = rng();
        let shape = Shape::matrix(8, 24);

        // xavier: n = 16, limit = sqrt(3 / 16)
        let limit = (3.0f32 / 16.0).sqrt();
        let w = VarianceScalingInitializer::xavier(VarianceDistribution::Uniform)
            .initialize(&mut rng, &shape)
            .unwrap();
        assert_eq!(w.len(), 192);
        assert!(w.iter().all(|v| v.abs() <= limit));

        // he normal: stddev = sqrt(2 / 8) = 0.5, truncated at 1.0
        let w = VarianceScalingInitializer::he(VarianceDistribution::TruncatedNormal)
            .initialize(&mut rng, &shape)
            .unwrap();
        assert!(w.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_variance_scaling_requires_rank_two() {
        let mut rng = rng();
        let init = VarianceScalingInitializer::lecun(VarianceDistribution::Uniform);
        let err = init
            .initialize(&mut rng, &Shape::new(vec![2, 3, 4]))
            .unwrap_err();
        assert!(matches!(err, HashTableError::UnsupportedInitializer { .. }));
        // Rows cannot be variance scaled.
        assert_eq!(init.initialize_row(&mut rng, 3), vec![0.0; 3]);
    }

    #[test]
    fn test_random_int_inclusive() {
        let mut rng = rng();
        let values = RandomIntInitializer::new(-1, 1).initialize(&mut rng, &Shape::vector(500)).unwrap();
        assert!(values.iter().all(|&v| v == -1.0 || v == 0.0 || v == 1.0));
        assert!(values.contains(&-1.0));
        assert!(values.contains(&1.0));
    }

    #[test]
    fn test_arange() {
        let mut rng = rng();
        let values = ArangeInitializer.initialize(&mut rng, &Shape::matrix(2, 2)).unwrap();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_factory_validates() {
        let err = InitializerFactory::create_initializer(&InitializerConfig::uniform(1.0, -1.0));
        assert!(matches!(err, Err(HashTableError::Core(_))));

        let init = InitializerFactory::create_initializer(&InitializerConfig::HeNormal).unwrap();
        assert_eq!(init.name(), "variance_scaling");
        assert!(!init.supports_rows());
    }

    #[test]
    fn test_rand_init_dense() {
        let mut rng = rng();
        let mut t = DenseTensor::zeros(Shape::matrix(2, 3)).unwrap();
        rand_init(&mut t, &mut rng, &InitializerConfig::Arange).unwrap();
        assert_eq!(t.as_slice(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut t = DenseTensor::zeros(Shape::vector(6)).unwrap();
        assert!(rand_init(&mut t, &mut rng, &InitializerConfig::XavierUniform).is_err());
        assert!(t.is_all_zero());

        let backing = vec![0.0f32; 2];
        let mut view = DenseTensor::from_view(Shape::vector(2), &backing).unwrap();
        assert!(matches!(
            rand_init(&mut view, &mut rng, &InitializerConfig::ones()),
            Err(HashTableError::Tensor(_))
        ));
    }
}
