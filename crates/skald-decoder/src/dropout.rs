//! Feature dropout with inverted scaling.

use ndarray::Array2;
use ndarray_rand::rand_distr::Bernoulli;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::error::ConfigError;

/// Zeroes features with probability `rate` and rescales survivors by
/// `1 / (1 - rate)` so activations keep their expected magnitude.
///
/// A rate of exactly zero is represented by *not* constructing a `Dropout`
/// at all; the stage must be absent, not a no-op invocation.
pub struct Dropout {
    rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Result<Self, ConfigError> {
        if !(0.0..1.0).contains(&rate) || rate == 0.0 {
            return Err(ConfigError::DropoutRange(rate));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Applies a fresh Bernoulli mask in place.
    pub fn apply<R: Rng>(&self, x: &mut Array2<f32>, rng: &mut R) {
        let keep = 1.0 - self.rate;
        let mask = Array2::<bool>::random_using(x.raw_dim(), Bernoulli::new(keep as f64).unwrap(), rng);
        x.zip_mut_with(&mask, |v, &kept| {
            *v = if kept { *v / keep } else { 0.0 };
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rate_bounds() {
        assert!(Dropout::new(0.0).is_err());
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(0.5).is_ok());
    }

    #[test]
    fn test_survivors_are_rescaled() {
        let dropout = Dropout::new(0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut x = Array2::from_elem((8, 8), 1.0f32);
        dropout.apply(&mut x, &mut rng);

        // Every entry is either dropped or scaled by 1 / keep.
        assert!(x.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(x.iter().any(|&v| v == 0.0));
        assert!(x.iter().any(|&v| v != 0.0));
    }
}
