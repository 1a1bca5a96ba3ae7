//! Metapopulation coordinator.
//!
//! Advances every deme by one sub-day timestep, applies between-deme
//! contact for every ordered pair of distinct demes, and aggregates the
//! global statistics. The engine is single-threaded and deterministic
//! given the seed: one `StdRng` is threaded through every operator in a
//! fixed order, and no operator observes a partially updated compartment
//! from within its own draw.

use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ancestry::{Ancestry, VirusId};
use crate::config::Parameters;
use crate::deme::DemePopulation;
use crate::errors::EpidriftError;
use crate::host::Host;
use crate::phenotype::PhenotypeRef;
use crate::stats::DiversityStats;
use crate::tree::TreeSummary;

pub struct Simulation {
    params: Parameters,
    demes: Vec<DemePopulation>,
    ancestry: Ancestry,
    rng: StdRng,
    day: f64,
    ur_virus: VirusId,
    ur_immunity: PhenotypeRef,
    stats: DiversityStats,
}

impl Simulation {
    pub fn new(params: Parameters, seed: u64) -> Result<Self, EpidriftError> {
        params.validate()?;
        let rng = StdRng::seed_from_u64(seed);
        let mut ancestry = Ancestry::new();
        let ur_immunity: PhenotypeRef = Rc::new(params.host_phenotype());
        let ur_virus = ancestry.seed(
            params.initial_deme - 1,
            Rc::new(params.virus_phenotype()),
            params.date(0.0),
        );
        let mut demes = Vec::with_capacity(params.demes.len());
        for deme in 0..params.demes.len() {
            demes.push(DemePopulation::new(deme, &params)?);
        }

        let mut simulation = Self {
            params,
            demes,
            ancestry,
            rng,
            day: 0.0,
            ur_virus,
            ur_immunity,
            stats: DiversityStats::default(),
        };
        simulation.reset_populations();
        Ok(simulation)
    }

    fn reset_populations(&mut self) {
        let date = self.params.date(self.day);
        for deme in &mut self.demes {
            deme.reset(
                &self.params,
                self.ur_virus,
                &self.ur_immunity,
                date,
                &mut self.ancestry,
                &mut self.rng,
            );
        }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn demes(&self) -> &[DemePopulation] {
        &self.demes
    }

    pub fn ancestry(&self) -> &Ancestry {
        &self.ancestry
    }

    pub fn day(&self) -> f64 {
        self.day
    }

    pub fn date(&self) -> f64 {
        self.params.date(self.day)
    }

    pub fn stats(&self) -> DiversityStats {
        self.stats
    }

    pub fn total_count(&self) -> usize {
        self.demes.iter().map(|deme| deme.total_count()).sum()
    }

    pub fn susceptible_count(&self) -> usize {
        self.demes.iter().map(|deme| deme.susceptible_count()).sum()
    }

    pub fn infected_count(&self) -> usize {
        self.demes.iter().map(|deme| deme.infected_count()).sum()
    }

    pub fn recovered_count(&self) -> usize {
        self.demes.iter().map(|deme| deme.recovered_count()).sum()
    }

    pub fn cases(&self) -> u64 {
        self.demes.iter().map(|deme| deme.cases()).sum()
    }

    pub fn reset_cases(&mut self) {
        for deme in &mut self.demes {
            deme.reset_cases();
        }
    }

    /// No infections left anywhere in the metapopulation.
    pub fn extinct(&self) -> bool {
        self.infected_count() == 0
    }

    /// A random current infection, weighted by worldwide prevalence.
    fn draw_infection<R: Rng>(demes: &[DemePopulation], rng: &mut R) -> Option<VirusId> {
        let total: usize = demes.iter().map(|deme| deme.infected_count()).sum();
        if total == 0 {
            return None;
        }
        let mut index = rng.gen_range(0..total);
        for deme in demes {
            if index < deme.infected_count() {
                return deme.random_infection(rng);
            }
            index -= deme.infected_count();
        }
        None
    }

    /// Advance the whole metapopulation by one timestep: every deme runs
    /// its within-deme operators, then between-deme contact is applied for
    /// every ordered pair of distinct demes, so foreign infected pools are
    /// always read in their post-transition state for the step.
    pub fn step_forward(&mut self) {
        let day = self.day;
        for index in 0..self.demes.len() {
            let deme = &mut self.demes[index];
            deme.step_forward(
                day,
                &self.params,
                &self.ur_immunity,
                &mut self.ancestry,
                &mut self.rng,
            );
        }
        for susceptible in 0..self.demes.len() {
            for foreign in 0..self.demes.len() {
                if susceptible == foreign {
                    continue;
                }
                let (deme, other) = pair_mut(&mut self.demes, susceptible, foreign);
                deme.between_deme_contact(other, day, &self.params, &mut self.ancestry, &mut self.rng);
            }
        }
        self.day += self.params.delta_t;
    }

    /// Refresh the global and per-deme diversity statistics.
    pub fn update_diversity(&mut self) {
        let stats = DiversityStats::sample(
            &self.ancestry,
            &self.params,
            |rng| Self::draw_infection(&self.demes, rng),
            &mut self.rng,
        );
        self.stats = stats;
        for deme in &mut self.demes {
            deme.update_diversity(&self.params, &self.ancestry, &mut self.rng);
        }
    }

    /// Mark the ancestry of every lineage still circulating as trunk.
    pub fn make_trunk(&mut self) {
        for index in 0..self.demes.len() {
            self.demes[index].make_trunk(&mut self.ancestry);
        }
    }

    /// Run the full genealogy reconstruction: prune the tips, reroot at
    /// their common ancestor, rebuild children lists, mark the trunk, lay
    /// the tree out and collapse uninformative chains. Returns the root,
    /// or `None` when too few tips were retained.
    pub fn reconstruct_genealogy(&mut self) -> Option<VirusId> {
        self.ancestry.prune_tips(&self.params, &mut self.rng);
        let root = self.ancestry.mark_and_reroot();
        if root.is_some() {
            self.ancestry.fill_backward();
            self.make_trunk();
            self.ancestry.sort_children_by_descendants();
            self.ancestry.set_layout_by_descendants();
            self.ancestry.streamline();
        }
        root
    }

    /// Tree statistics over the reconstructed genealogy.
    pub fn tree_summary(&mut self) -> TreeSummary {
        self.ancestry
            .tree_summary(&self.params, self.params.date(self.day), &mut self.rng)
    }

    /// Restart after extinction: day back to zero, ancestry cleared,
    /// populations re-seeded.
    pub fn reset(&mut self) {
        self.day = 0.0;
        self.ancestry.clear();
        self.ur_virus = self.ancestry.seed(
            self.params.initial_deme - 1,
            Rc::new(self.params.virus_phenotype()),
            self.params.date(0.0),
        );
        self.stats = DiversityStats::default();
        self.reset_populations();
    }

    /// Import one checkpointed host, recreating its infection as a copy of
    /// the founding virus.
    pub fn restore_host_line(&mut self, line: &str) -> Result<(), EpidriftError> {
        let date = self.params.date(self.day);
        let (deme, host) = Host::from_checkpoint_line(
            line,
            &self.params,
            self.ur_virus,
            date,
            &mut self.ancestry,
        )?;
        if deme >= self.demes.len() {
            return Err(EpidriftError::CheckpointError(format!(
                "host references unknown deme {deme}"
            )));
        }
        self.demes[deme].restore_host(host, &mut self.ancestry);
        Ok(())
    }
}

/// Disjoint mutable/shared access to two demes of the same slice.
fn pair_mut(
    demes: &mut [DemePopulation],
    first: usize,
    second: usize,
) -> (&mut DemePopulation, &DemePopulation) {
    debug_assert_ne!(first, second);
    if first < second {
        let (head, tail) = demes.split_at_mut(second);
        (&mut head[first], &tail[0])
    } else {
        let (head, tail) = demes.split_at_mut(first);
        (&mut tail[0], &head[second])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep_params() -> Parameters {
        let mut params = Parameters::default();
        params.demes.truncate(1);
        params.initial_deme = 1;
        params.demes[0].initial_n = 400;
        params.demes[0].amplitude = 0.0;
        params.demes[0].species[0].birth_rate = 0.0;
        params.demes[0].species[0].death_rate = 0.0;
        params.initial_i = 10;
        params.initial_pr_r = 0.0;
        params.beta = 2.0;
        params.nu = 0.2;
        params.mu_phenotype = 0.0;
        params.transcendental = true;
        params.immunity_loss = 0.0;
        params.initial_pr_t = 0.0;
        params.swap_demography = false;
        params.burnin = 0;
        params.tip_sampling_rate = 0.5;
        params.tip_sampling_proportional = true;
        params.tip_samples_per_deme = 50;
        params.tree_proportion = 1.0;
        params.diversity_sampling_count = 200;
        params
    }

    #[test]
    fn epidemic_sweep_runs_to_extinction() {
        let mut simulation = Simulation::new(sweep_params(), 2024).unwrap();

        let mut steps = 0;
        while !simulation.extinct() && steps < 200_000 {
            simulation.step_forward();
            steps += 1;
        }

        assert!(simulation.extinct());
        assert_eq!(simulation.infected_count(), 0);
        assert_eq!(
            simulation.susceptible_count() + simulation.recovered_count(),
            400
        );
        // with a reproduction number of 10, the epidemic sweeps most hosts
        assert!(simulation.recovered_count() > 200);

        let root = simulation.reconstruct_genealogy().unwrap();
        for &tip in simulation.ancestry().tips() {
            let mut current = tip;
            let reached_root = loop {
                if current == root {
                    break true;
                }
                match simulation.ancestry().get(current).parent() {
                    Some(parent) => current = parent,
                    None => break false,
                }
            };
            assert!(reached_root, "root must be an ancestor of every tip");
        }

        let summary = simulation.tree_summary();
        assert!(summary.diversity >= 0.0);
        assert!(summary.tmrca >= 0.0);
    }

    #[test]
    fn infection_crosses_demes_through_between_deme_contact() {
        let mut params = Parameters::default();
        params.demes.truncate(2);
        params.initial_deme = 1;
        for deme in &mut params.demes {
            deme.initial_n = 200;
            deme.amplitude = 0.0;
        }
        params.initial_i = 20;
        params.initial_pr_r = 0.0;
        params.beta = 1.0;
        params.nu = 0.1;
        params.between_deme_pro = 0.5;
        params.mu_phenotype = 0.0;
        params.swap_demography = true;

        let mut simulation = Simulation::new(params, 7).unwrap();
        for _ in 0..2000 {
            simulation.step_forward();
            if simulation.demes()[1].cases() > 0 {
                break;
            }
        }
        assert!(simulation.demes()[1].cases() > 0);
    }

    #[test]
    fn reset_restores_the_initial_state() {
        let mut simulation = Simulation::new(sweep_params(), 99).unwrap();
        for _ in 0..100 {
            simulation.step_forward();
        }
        simulation.reset();
        assert_eq!(simulation.day(), 0.0);
        assert_eq!(simulation.total_count(), 400);
        assert_eq!(simulation.infected_count(), 10);
        assert!(simulation.ancestry().tips().is_empty());
    }

    #[test]
    fn diversity_statistics_have_support_while_circulating() {
        let mut simulation = Simulation::new(sweep_params(), 5).unwrap();
        for _ in 0..50 {
            simulation.step_forward();
        }
        assert!(!simulation.extinct());
        simulation.update_diversity();
        let stats = simulation.stats();
        assert!(stats.diversity >= 0.0);
        assert!(stats.serial_interval >= 0.0);
    }

    #[test]
    fn checkpoint_lines_restore_hosts() {
        let mut simulation = Simulation::new(sweep_params(), 13).unwrap();
        let before = simulation.total_count();
        simulation.restore_host_line("0:-6.0000,0.0000:n").unwrap();
        simulation
            .restore_host_line("0:n:1.0,0.5;2.0,0.25")
            .unwrap();
        assert_eq!(simulation.total_count(), before + 2);
        assert_eq!(simulation.infected_count(), 11);
        assert!(simulation.restore_host_line("9:n:n").is_err());
    }
}
