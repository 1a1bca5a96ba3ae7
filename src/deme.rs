//! Per-deme coordinator.
//!
//! A deme advances one timestep at a time: demography first, then the
//! within-deme epidemic operators with their counts drawn up front,
//! mutation last. Environment clearance and environment-mediated infection
//! run once per whole-day boundary, detected through an accumulated
//! fractional offset. Tip sampling for the genealogy happens after all
//! transitions.

use rand::Rng;

use crate::ancestry::{Ancestry, VirusId};
use crate::config::Parameters;
use crate::environment::Environment;
use crate::errors::EpidriftError;
use crate::host::Host;
use crate::phenotype::PhenotypeRef;
use crate::random;
use crate::species::SpeciesPopulation;
use crate::stats::DiversityStats;

#[derive(Debug)]
pub struct DemePopulation {
    deme: usize,
    name: String,
    species: Vec<SpeciesPopulation>,
    environment: Option<Environment>,
    cases: u64,
    day_offset: f64,
    stats: DiversityStats,
}

impl DemePopulation {
    pub fn new(deme: usize, params: &Parameters) -> Result<Self, EpidriftError> {
        let record = &params.demes[deme];
        if record.species.is_empty() {
            return Err(EpidriftError::ConfigError(format!(
                "no species configured for deme `{}`",
                record.name
            )));
        }
        Ok(Self {
            deme,
            name: record.name.clone(),
            species: record
                .species
                .iter()
                .map(|spec| SpeciesPopulation::new(spec.clone()))
                .collect(),
            environment: record.environment.clone().map(Environment::new),
            cases: 0,
            day_offset: 0.0,
            stats: DiversityStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_count(&self) -> usize {
        self.species.iter().map(|s| s.total_count()).sum()
    }

    pub fn susceptible_count(&self) -> usize {
        self.species.iter().map(|s| s.susceptible_count()).sum()
    }

    pub fn infected_count(&self) -> usize {
        self.species.iter().map(|s| s.infected_count()).sum()
    }

    pub fn recovered_count(&self) -> usize {
        self.species.iter().map(|s| s.recovered_count()).sum()
    }

    pub fn cases(&self) -> u64 {
        self.cases
    }

    pub fn reset_cases(&mut self) {
        self.cases = 0;
    }

    pub fn stats(&self) -> DiversityStats {
        self.stats
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    fn pr_susceptible(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            return 0.0;
        }
        self.susceptible_count() as f64 / total as f64
    }

    /// Repopulate the compartments for a fresh run; the infection is seeded
    /// only in the configured initial deme.
    pub fn reset(
        &mut self,
        params: &Parameters,
        ur_virus: VirusId,
        ur_immunity: &PhenotypeRef,
        date: f64,
        ancestry: &mut Ancestry,
        rng: &mut impl Rng,
    ) {
        let record = &params.demes[self.deme];
        let initial_r = params.initial_recovered(self.deme);
        let initial_i = if self.deme + 1 == params.initial_deme {
            params.initial_i
        } else {
            0
        };
        let initial_s = record.initial_n.saturating_sub(initial_r + initial_i);

        let environment = &mut self.environment;
        for species in &mut self.species {
            species.clear();
            species.create_hosts(
                self.deme,
                initial_s,
                initial_i,
                initial_r,
                ur_virus,
                ur_immunity,
                date,
                params,
                ancestry,
                environment.as_mut(),
                rng,
            );
        }
        self.cases = 0;
        self.day_offset = 0.0;
        self.stats = DiversityStats::default();
    }

    /// Current infection of a uniformly random infected host.
    pub fn random_infection(&self, rng: &mut impl Rng) -> Option<VirusId> {
        let total = self.infected_count();
        if total == 0 {
            return None;
        }
        let mut index = rng.gen_range(0..total);
        for species in &self.species {
            if index < species.infected_count() {
                return species.infection_at(index);
            }
            index -= species.infected_count();
        }
        None
    }

    /// Try to infect the susceptible host at a deme-wide position, walking
    /// the species lists to find it.
    fn infect_susceptible(
        &mut self,
        mut sus_index: usize,
        source: VirusId,
        date: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        rng: &mut impl Rng,
    ) -> bool {
        let deme = self.deme;
        let environment = &mut self.environment;
        for species in &mut self.species {
            if sus_index < species.susceptible_count() {
                return species.infect(
                    sus_index,
                    source,
                    deme,
                    date,
                    params,
                    ancestry,
                    environment.as_mut(),
                    rng,
                );
            }
            sus_index -= species.susceptible_count();
        }
        false
    }

    /// Advance this deme by one timestep.
    pub fn step_forward(
        &mut self,
        day: f64,
        params: &Parameters,
        ur_immunity: &PhenotypeRef,
        ancestry: &mut Ancestry,
        rng: &mut impl Rng,
    ) {
        let date = params.date(day);

        if params.swap_demography {
            self.swap(params, ancestry, rng);
        } else {
            self.grow(day, params, ur_immunity, rng);
            self.decline(params, ancestry, rng);
        }

        // counts for both operators are drawn before either distributes
        let contact_rate = self.infected_count() as f64
            * self.pr_susceptible()
            * params.beta
            * params.seasonality(self.deme, date)
            * params.delta_t;
        let contacts = random::poisson_count(contact_rate, rng);
        let recovery_rate = self.infected_count() as f64 * params.nu * params.delta_t;
        let recoveries = random::poisson_count(recovery_rate, rng);

        self.distribute_contacts(contacts, date, params, ancestry, rng);
        self.distribute_recoveries(recoveries, params, ancestry, rng);
        if params.transcendental {
            self.lose_immunity(params, rng);
        }
        self.mutate(date, params, ancestry, rng);

        // the environment is cleared per day rather than per timestep
        self.day_offset += params.delta_t;
        if self.day_offset >= 1.0 {
            self.day_offset = 0.0;
            if let Some(environment) = &mut self.environment {
                environment.clear_viruses(params.demes[self.deme].offset, date, 1.0, ancestry);
            }
            self.environmental_infections(1.0, date, params, ancestry, rng);
        }

        self.sample_tips(day, params, ancestry, rng);
    }

    fn grow(&mut self, day: f64, params: &Parameters, ur_immunity: &PhenotypeRef, rng: &mut impl Rng) {
        let day_of_year = (day as u64 % 365) as u32;
        for species in &mut self.species {
            species.grow(day_of_year, params, ur_immunity, rng);
        }
    }

    fn decline(&mut self, params: &Parameters, ancestry: &mut Ancestry, rng: &mut impl Rng) {
        let environment = &mut self.environment;
        for species in &mut self.species {
            species.decline(params, ancestry, environment.as_mut(), rng);
        }
    }

    fn swap(&mut self, params: &Parameters, ancestry: &mut Ancestry, rng: &mut impl Rng) {
        let environment = &mut self.environment;
        for species in &mut self.species {
            species.make_susceptible(params, ancestry, environment.as_mut(), rng);
        }
    }

    fn distribute_contacts(
        &mut self,
        contacts: usize,
        date: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        rng: &mut impl Rng,
    ) {
        for _ in 0..contacts {
            if self.susceptible_count() == 0 || self.infected_count() == 0 {
                break;
            }
            let Some(source) = self.random_infection(rng) else {
                break;
            };
            let sus_index = rng.gen_range(0..self.susceptible_count());
            if self.infect_susceptible(sus_index, source, date, params, ancestry, rng) {
                self.cases += 1;
            }
        }
    }

    /// Contact from a foreign deme's infected pool into this deme's
    /// susceptibles, scaled by the between-deme proportionality constant.
    pub fn between_deme_contact(
        &mut self,
        other: &DemePopulation,
        day: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        rng: &mut impl Rng,
    ) {
        let date = params.date(day);
        let rate = other.infected_count() as f64
            * self.pr_susceptible()
            * params.beta
            * params.between_deme_pro
            * params.seasonality(self.deme, date)
            * params.delta_t;
        let contacts = random::poisson_count(rate, rng);
        for _ in 0..contacts {
            if self.susceptible_count() == 0 {
                break;
            }
            let Some(source) = other.random_infection(rng) else {
                break;
            };
            let sus_index = rng.gen_range(0..self.susceptible_count());
            if self.infect_susceptible(sus_index, source, date, params, ancestry, rng) {
                self.cases += 1;
            }
        }
    }

    fn distribute_recoveries(
        &mut self,
        recoveries: usize,
        params: &Parameters,
        ancestry: &mut Ancestry,
        rng: &mut impl Rng,
    ) {
        for _ in 0..recoveries {
            if self.infected_count() == 0 {
                break;
            }
            let mut index = rng.gen_range(0..self.infected_count());
            let environment = &mut self.environment;
            for species in &mut self.species {
                if index < species.infected_count() {
                    species.recover(index, params, ancestry, environment.as_mut());
                    break;
                }
                index -= species.infected_count();
            }
        }
    }

    fn lose_immunity(&mut self, params: &Parameters, rng: &mut impl Rng) {
        let rate = self.recovered_count() as f64 * params.immunity_loss * params.delta_t;
        let returns = random::poisson_count(rate, rng);
        for _ in 0..returns {
            if self.recovered_count() == 0 {
                break;
            }
            let mut index = rng.gen_range(0..self.recovered_count());
            for species in &mut self.species {
                if index < species.recovered_count() {
                    species.lose_immunity(index);
                    break;
                }
                index -= species.recovered_count();
            }
        }
    }

    fn mutate(&mut self, date: f64, params: &Parameters, ancestry: &mut Ancestry, rng: &mut impl Rng) {
        let rate = self.infected_count() as f64 * params.mu_phenotype * params.delta_t;
        let mutations = random::poisson_count(rate, rng);
        for _ in 0..mutations {
            if self.infected_count() == 0 {
                break;
            }
            let mut index = rng.gen_range(0..self.infected_count());
            let environment = &mut self.environment;
            for species in &mut self.species {
                if index < species.infected_count() {
                    species.mutate(index, date, params, ancestry, environment.as_mut(), rng);
                    break;
                }
                index -= species.infected_count();
            }
        }
    }

    /// Vaccinate a Poisson-drawn number of susceptible hosts (S→R).
    pub fn vaccinate(&mut self, params: &Parameters, rng: &mut impl Rng) {
        let rate = self.susceptible_count() as f64 * params.vaccinate * params.delta_t;
        let vaccinations = random::poisson_count(rate, rng);
        for _ in 0..vaccinations {
            if self.susceptible_count() == 0 {
                break;
            }
            let mut index = rng.gen_range(0..self.susceptible_count());
            for species in &mut self.species {
                if index < species.susceptible_count() {
                    species.vaccinate(index);
                    break;
                }
                index -= species.susceptible_count();
            }
        }
    }

    /// Remove a Poisson-drawn number of infected hosts.
    pub fn cull(&mut self, params: &Parameters, ancestry: &mut Ancestry, rng: &mut impl Rng) {
        let rate = self.infected_count() as f64 * params.culling * params.delta_t;
        let removals = random::poisson_count(rate, rng);
        for _ in 0..removals {
            if self.infected_count() == 0 {
                break;
            }
            let mut index = rng.gen_range(0..self.infected_count());
            let environment = &mut self.environment;
            for species in &mut self.species {
                if index < species.infected_count() {
                    species.cull(index, ancestry, environment.as_mut());
                    break;
                }
                index -= species.infected_count();
            }
        }
    }

    /// Environment-mediated infection: draw contacts against the reservoir
    /// and attempt each exactly like a direct contact. An empty reservoir
    /// draw skips the attempt.
    fn environmental_infections(
        &mut self,
        step: f64,
        date: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        rng: &mut impl Rng,
    ) {
        let Some(environment) = &self.environment else {
            return;
        };
        let rate = self.susceptible_count() as f64 * environment.up_take_rate() * step;
        let attempts = random::poisson_count(rate, rng);
        for _ in 0..attempts {
            if self.susceptible_count() == 0 {
                break;
            }
            let Some(source) = self
                .environment
                .as_ref()
                .and_then(|environment| environment.get_virus(rng))
            else {
                continue;
            };
            let sus_index = rng.gen_range(0..self.susceptible_count());
            if self.infect_susceptible(sus_index, source, date, params, ancestry, rng) {
                self.cases += 1;
            }
        }
    }

    /// Register a Poisson-drawn number of current infections as genealogy
    /// tips, once the burn-in has passed.
    fn sample_tips(&mut self, day: f64, params: &Parameters, ancestry: &mut Ancestry, rng: &mut impl Rng) {
        if self.infected_count() == 0 || day < params.burnin as f64 {
            return;
        }
        let mut rate = params.tip_sampling_rate * params.delta_t;
        if params.tip_sampling_proportional {
            rate *= self.infected_count() as f64;
        }
        let samples = random::poisson_count(rate, rng);
        for _ in 0..samples {
            if let Some(virus) = self.random_infection(rng) {
                ancestry.register_tip(virus);
            }
        }
    }

    /// Mark the ancestry of every current infection as trunk.
    pub fn make_trunk(&self, ancestry: &mut Ancestry) {
        for species in &self.species {
            species.make_trunk(ancestry);
        }
    }

    /// Refresh this deme's diversity statistics from its current infections.
    pub fn update_diversity(&mut self, params: &Parameters, ancestry: &Ancestry, rng: &mut impl Rng) {
        let stats = if self.infected_count() > 1 {
            DiversityStats::sample(ancestry, params, |rng| self.random_infection(rng), rng)
        } else {
            DiversityStats::default()
        };
        self.stats = stats;
    }

    /// All hosts of this deme across species and compartments.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.species.iter().flat_map(|species| species.hosts())
    }

    pub fn deme_index(&self) -> usize {
        self.deme
    }

    /// Install an imported host into the matching compartment of the first
    /// species. An imported infection starts shedding when this deme
    /// carries an environment.
    pub fn restore_host(&mut self, host: Host, ancestry: &mut Ancestry) {
        if let (Some(infection), Some(environment)) = (host.infection(), self.environment.as_mut())
        {
            ancestry.get_mut(infection).host_infected();
            if ancestry.get(infection).hosts_shedding() == 1 {
                environment.add(infection, ancestry);
            }
        }
        self.species[0].restore_host(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::rc::Rc;

    fn small_params() -> Parameters {
        let mut params = Parameters::default();
        params.initial_deme = 1;
        params.initial_pr_r = 0.0;
        params.demes.truncate(1);
        params.demes[0].initial_n = 200;
        params
    }

    fn setup(params: &Parameters) -> (DemePopulation, Ancestry, PhenotypeRef, StdRng) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut ancestry = Ancestry::new();
        let ur_immunity: PhenotypeRef = Rc::new(params.host_phenotype());
        let ur_virus = ancestry.seed(0, Rc::new(params.virus_phenotype()), 0.0);
        let mut deme = DemePopulation::new(0, params).unwrap();
        deme.reset(params, ur_virus, &ur_immunity, 0.0, &mut ancestry, &mut rng);
        (deme, ancestry, ur_immunity, rng)
    }

    #[test]
    fn reset_seeds_the_initial_compartments() {
        let params = small_params();
        let (deme, _ancestry, _ur_immunity, _rng) = setup(&params);
        assert_eq!(deme.total_count(), 200);
        assert_eq!(deme.infected_count(), params.initial_i);
        assert_eq!(deme.susceptible_count(), 200 - params.initial_i);
    }

    #[test]
    fn stepping_preserves_the_population_partition() {
        let params = small_params();
        let (mut deme, mut ancestry, ur_immunity, mut rng) = setup(&params);
        for step in 0..200 {
            let day = step as f64 * params.delta_t;
            deme.step_forward(day, &params, &ur_immunity, &mut ancestry, &mut rng);
            // swap demography holds the population size constant
            assert_eq!(deme.total_count(), 200);
        }
    }

    #[test]
    fn vaccination_and_culling_shift_compartments() {
        let mut params = small_params();
        params.vaccinate = 50.0;
        params.culling = 50.0;
        let (mut deme, mut ancestry, _ur_immunity, mut rng) = setup(&params);

        deme.vaccinate(&params, &mut rng);
        assert!(deme.recovered_count() > 0);

        deme.cull(&params, &mut ancestry, &mut rng);
        assert_eq!(deme.infected_count(), 0);
        assert!(deme.total_count() < 200);
    }

    #[test]
    fn diversity_requires_at_least_two_infections() {
        let mut params = small_params();
        params.initial_i = 1;
        let (mut deme, ancestry, _ur_immunity, mut rng) = setup(&params);
        deme.update_diversity(&params, &ancestry, &mut rng);
        assert_eq!(deme.stats().diversity, 0.0);
    }
}
