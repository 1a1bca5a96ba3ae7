//! Antigenic phenotypes.
//!
//! A phenotype is the antigenic coordinate of a viral lineage. It determines
//! cross-immunity against a host's infection history and how mutation moves
//! a lineage through antigenic space. Phenotype values are immutable; many
//! lineage nodes and immune-history entries share one value through a
//! [`PhenotypeRef`], and [`Phenotype::mutate`] always returns a fresh value.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::rc::Rc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Parameters;
use crate::errors::EpidriftError;
use crate::random;

/// Shared handle to a phenotype value.
pub type PhenotypeRef = Rc<Phenotype>;

/// Closest-distance sentinel for hosts without any immune history.
const NAIVE_DISTANCE: f64 = 100.0;

/// Distance below which a history entry is treated as antigenically
/// identical and the history scan stops early. Closer entries can only
/// lower the risk further, so the shortcut does not change results.
const IDENTITY_CUTOFF: f64 = 0.01;

/// The antigenic space a simulation runs in, chosen once at configuration
/// time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhenotypeSpace {
    Geometric,
}

impl PhenotypeSpace {
    /// Construct a phenotype at the given coordinates.
    pub fn make(&self, trait_a: f64, trait_b: f64) -> Phenotype {
        match self {
            PhenotypeSpace::Geometric => {
                Phenotype::Geometric(GeometricPhenotype::new(trait_a, trait_b))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Phenotype {
    Geometric(GeometricPhenotype),
}

impl Phenotype {
    /// Raw antigenic distance between two phenotypes.
    ///
    /// The distance is a metric: symmetric, non-negative and zero exactly
    /// for identical coordinates.
    pub fn distance(&self, other: &Phenotype) -> f64 {
        match (self, other) {
            (Phenotype::Geometric(a), Phenotype::Geometric(b)) => a.distance(b),
        }
    }

    /// Distance mapped through the cross-immunity curve, in `[0, 1)`.
    pub fn antigenic_distance(&self, other: &Phenotype, params: &Parameters) -> f64 {
        cross_immunity(self.distance(other), params)
    }

    /// Return a mutated copy; the original phenotype is left untouched.
    pub fn mutate(&self, params: &Parameters, rng: &mut impl Rng) -> Phenotype {
        match self {
            Phenotype::Geometric(p) => Phenotype::Geometric(p.mutate(params, rng)),
        }
    }

    /// Risk of this phenotype infecting a host with the given immune
    /// history, in `[1 - homologousImmunity, 1]`.
    ///
    /// The risk is derived from the closest phenotype in the history; an
    /// empty history leaves the sentinel distance in place and the risk
    /// saturates near 1.
    pub fn risk_of_infection(&self, history: &[PhenotypeRef], params: &Parameters) -> f64 {
        let mut closest = NAIVE_DISTANCE;
        for past in history {
            let dist = self.distance(past);
            if dist < closest {
                closest = dist;
            }
            if dist < IDENTITY_CUTOFF {
                break;
            }
        }

        let risk = cross_immunity(closest, params);
        let floor = 1.0 - params.homologous_immunity;
        risk.max(floor).min(1.0)
    }

    /// Parse a phenotype from its textual checkpoint form, e.g. `-6.0,0.25`.
    pub fn parse(text: &str, space: PhenotypeSpace) -> Result<Phenotype, EpidriftError> {
        let coordinates: Vec<f64> = text
            .split(',')
            .map(|token| token.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| {
                EpidriftError::CheckpointError(format!("invalid phenotype `{text}`"))
            })?;
        match (space, coordinates.as_slice()) {
            (PhenotypeSpace::Geometric, [a, b]) => Ok(space.make(*a, *b)),
            _ => Err(EpidriftError::CheckpointError(format!(
                "expected two coordinates in `{text}`"
            ))),
        }
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phenotype::Geometric(p) => write!(f, "{:.4},{:.4}", p.trait_a(), p.trait_b()),
        }
    }
}

fn cross_immunity(distance: f64, params: &Parameters) -> f64 {
    1.0 - (-distance / params.antigenic_shape).exp() * params.min_cross_immunity
}

/// Two-dimensional Euclidean antigenic coordinate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GeometricPhenotype {
    trait_a: f64,
    trait_b: f64,
}

impl GeometricPhenotype {
    pub fn new(trait_a: f64, trait_b: f64) -> Self {
        Self { trait_a, trait_b }
    }

    pub fn trait_a(&self) -> f64 {
        self.trait_a
    }

    pub fn trait_b(&self) -> f64 {
        self.trait_b
    }

    fn distance(&self, other: &GeometricPhenotype) -> f64 {
        let dist_a = self.trait_a - other.trait_a;
        let dist_b = self.trait_b - other.trait_b;
        (dist_a * dist_a + dist_b * dist_b).sqrt()
    }

    fn mutate(&self, params: &Parameters, rng: &mut impl Rng) -> GeometricPhenotype {
        // direction of mutation
        let theta = if params.mut_two_dimensional {
            rng.gen_range(0.0..TAU)
        } else if random::coin(0.5, rng) {
            0.0
        } else {
            PI
        };

        // size of mutation
        let r = if params.fixed_step {
            params.mean_step
        } else {
            random::gamma_step(params.mean_step, params.sd_step, rng)
        };

        GeometricPhenotype {
            trait_a: self.trait_a + r * theta.cos(),
            trait_b: self.trait_b + r * theta.sin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn params() -> Parameters {
        Parameters::default()
    }

    #[test]
    fn distance_is_a_metric() {
        let space = PhenotypeSpace::Geometric;
        let p = space.make(0.0, 0.0);
        let q = space.make(3.0, 4.0);
        assert_eq!(p.distance(&q), 5.0);
        assert_eq!(q.distance(&p), 5.0);
        assert_eq!(p.distance(&p), 0.0);
    }

    #[test]
    fn antigenic_distance_grows_with_distance() {
        let params = params();
        let space = PhenotypeSpace::Geometric;
        let origin = space.make(0.0, 0.0);
        let mut last = -1.0;
        for step in 0..20 {
            let other = space.make(step as f64 * 0.5, 0.0);
            let mapped = origin.antigenic_distance(&other, &params);
            assert!(mapped >= last);
            assert!((0.0..1.0).contains(&mapped));
            last = mapped;
        }
    }

    #[test]
    fn risk_hits_floor_on_exact_match() {
        let params = params();
        let phenotype = Rc::new(PhenotypeSpace::Geometric.make(1.5, -2.0));
        let history = vec![Rc::clone(&phenotype)];
        let risk = phenotype.risk_of_infection(&history, &params);
        assert!((risk - (1.0 - params.homologous_immunity)).abs() < 1e-12);
    }

    #[test]
    fn risk_stays_in_bounds() {
        let params = params();
        let phenotype = PhenotypeSpace::Geometric.make(0.0, 0.0);
        let floor = 1.0 - params.homologous_immunity;

        let naive_risk = phenotype.risk_of_infection(&[], &params);
        assert!(naive_risk >= floor && naive_risk <= 1.0);

        let far = Rc::new(PhenotypeSpace::Geometric.make(50.0, 0.0));
        let risk = phenotype.risk_of_infection(&[far], &params);
        assert!(risk >= floor && risk <= 1.0);
    }

    #[test]
    fn fixed_step_mutation_moves_exactly_one_step() {
        let mut params = params();
        params.fixed_step = true;
        params.mean_step = 0.3;
        params.mut_two_dimensional = false;

        let mut rng = StdRng::seed_from_u64(42);
        let origin = PhenotypeSpace::Geometric.make(1.0, 1.0);
        for _ in 0..10 {
            let mutant = origin.mutate(&params, &mut rng);
            assert!((origin.distance(&mutant) - params.mean_step).abs() < 1e-9);
        }
    }

    #[test]
    fn parse_round_trip() {
        let phenotype = PhenotypeSpace::Geometric.make(-6.0, 0.25);
        let text = phenotype.to_string();
        let parsed = Phenotype::parse(&text, PhenotypeSpace::Geometric).unwrap();
        assert!(phenotype.distance(&parsed) < 1e-4);
        assert!(Phenotype::parse("not,a,phenotype", PhenotypeSpace::Geometric).is_err());
    }
}
