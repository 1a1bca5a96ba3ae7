//! Shared draw helpers for the transition operators.
//!
//! Rates computed from compartment sizes can legitimately collapse to zero;
//! the helpers reject non-positive rates before they reach the samplers.

use rand::Rng;
use rand_distr::{Distribution, Gamma, Poisson};

/// Draw an event count from a Poisson distribution.
///
/// A rate that is zero, negative or non-finite yields no events.
pub fn poisson_count(rate: f64, rng: &mut impl Rng) -> usize {
    if rate <= 0.0 {
        return 0;
    }
    match Poisson::new(rate) {
        Ok(dist) => dist.sample(rng) as usize,
        Err(_) => 0,
    }
}

/// Draw a gamma-distributed step size parameterised by mean and standard
/// deviation, so that the moments of the draw match the configured values.
pub fn gamma_step(mean: f64, sd: f64, rng: &mut impl Rng) -> f64 {
    let shape = (mean * mean) / (sd * sd);
    let scale = (sd * sd) / mean;
    match Gamma::new(shape, scale) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

/// Bernoulli draw that tolerates probabilities outside `[0, 1]`.
pub fn coin(probability: f64, rng: &mut impl Rng) -> bool {
    rng.r#gen::<f64>() < probability
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn zero_rate_yields_no_events() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(poisson_count(0.0, &mut rng), 0);
        assert_eq!(poisson_count(-1.0, &mut rng), 0);
        assert_eq!(poisson_count(f64::NAN, &mut rng), 0);
    }

    #[test]
    fn coin_extremes() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(coin(1.5, &mut rng));
        assert!(!coin(-0.5, &mut rng));
    }

    #[test]
    fn gamma_step_is_positive() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert!(gamma_step(0.3, 0.3, &mut rng) > 0.0);
        }
    }
}
