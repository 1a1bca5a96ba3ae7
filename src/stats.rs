//! Diversity statistics over sampled infection pairs.
//!
//! The same estimator serves the per-deme and the global reporting: draw a
//! fixed number of random infection pairs and accumulate tree distance,
//! antigenic distance, the windowed coalescence indicator and the serial
//! interval.

use rand::Rng;

use crate::ancestry::{Ancestry, VirusId};
use crate::config::Parameters;

#[derive(Clone, Copy, Debug, Default)]
pub struct DiversityStats {
    /// Mean pairwise tree distance, in years.
    pub diversity: f64,
    /// Half the maximum sampled pair distance.
    pub tmrca: f64,
    /// Coalescence opportunity over coalescence count; non-finite when no
    /// sampled pair coalesced.
    pub netau: f64,
    /// Mean interval between an infection's birth and its parent's birth.
    pub serial_interval: f64,
    /// Mean pairwise antigenic distance.
    pub antigenic_diversity: f64,
}

impl DiversityStats {
    /// Estimate the statistics from repeated draws of infection pairs.
    ///
    /// `draw` supplies one random infection per call; draws that come back
    /// empty skip the pair.
    pub fn sample<R, F>(
        ancestry: &Ancestry,
        params: &Parameters,
        mut draw: F,
        rng: &mut R,
    ) -> DiversityStats
    where
        R: Rng,
        F: FnMut(&mut R) -> Option<VirusId>,
    {
        let mut stats = DiversityStats::default();
        let window = params.netau_window as f64 / 365.0;
        let count = params.diversity_sampling_count;
        if count == 0 {
            return stats;
        }

        let mut coalescence_count = 0.0;
        let mut coalescence_opportunity = 0.0;
        let mut serial_samples = 0usize;

        for _ in 0..count {
            let (Some(a), Some(b)) = (draw(rng), draw(rng)) else {
                continue;
            };
            let dist = ancestry.distance(a, b);
            stats.diversity += dist;
            if dist > stats.tmrca {
                stats.tmrca = dist;
            }
            stats.antigenic_diversity += ancestry.antigenic_distance(a, b, params);
            coalescence_opportunity += window;
            coalescence_count += ancestry.coalescence(a, b, window);
            if let Some(interval) = ancestry.serial_interval(a) {
                stats.serial_interval += interval;
                serial_samples += 1;
            }
        }

        stats.diversity /= count as f64;
        stats.tmrca /= 2.0;
        stats.antigenic_diversity /= count as f64;
        stats.netau = coalescence_opportunity / coalescence_count;
        if serial_samples > 0 {
            stats.serial_interval /= serial_samples as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::PhenotypeSpace;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::rc::Rc;

    #[test]
    fn empty_draws_yield_zero_statistics() {
        let ancestry = Ancestry::new();
        let params = Parameters::default();
        let mut rng = StdRng::seed_from_u64(0);
        let stats = DiversityStats::sample(&ancestry, &params, |_| None, &mut rng);
        assert_eq!(stats.diversity, 0.0);
        assert_eq!(stats.tmrca, 0.0);
        assert!(!stats.netau.is_finite());
    }

    #[test]
    fn sibling_pairs_coalesce_within_the_window() {
        let mut ancestry = Ancestry::new();
        let phenotype = Rc::new(PhenotypeSpace::Geometric.make(0.0, 0.0));
        let parent = ancestry.seed(0, phenotype, 0.0);
        let a = ancestry.transmit(parent, 0, 0.01);
        let b = ancestry.transmit(parent, 0, 0.02);

        let params = Parameters::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut toggle = false;
        let stats = DiversityStats::sample(
            &ancestry,
            &params,
            |_| {
                toggle = !toggle;
                Some(if toggle { a } else { b })
            },
            &mut rng,
        );
        // every sampled pair is (a, b): distance 0.03, certain coalescence
        assert!((stats.diversity - 0.03).abs() < 1e-12);
        assert!((stats.tmrca - 0.015).abs() < 1e-12);
        assert!((stats.netau - params.netau_window as f64 / 365.0).abs() < 1e-9);
        assert!((stats.serial_interval - 0.01).abs() < 1e-12);
    }
}
