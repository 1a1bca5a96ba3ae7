//! Per-species S/I/R compartments within a deme.
//!
//! Each species keeps three disjoint host lists. A host always sits in
//! exactly one of them; transitions move the host by value. Removals swap
//! with the last element, so positions are only stable until the next
//! removal and iteration order carries no meaning.

use rand::Rng;

use crate::ancestry::{Ancestry, VirusId};
use crate::config::{Parameters, SpeciesParameters};
use crate::environment::Environment;
use crate::host::Host;
use crate::phenotype::PhenotypeRef;
use crate::random;

#[derive(Debug)]
pub struct SpeciesPopulation {
    spec: SpeciesParameters,
    susceptibles: Vec<Host>,
    infecteds: Vec<Host>,
    recovereds: Vec<Host>,
}

impl SpeciesPopulation {
    pub fn new(spec: SpeciesParameters) -> Self {
        Self {
            spec,
            susceptibles: Vec::new(),
            infecteds: Vec::new(),
            recovereds: Vec::new(),
        }
    }

    pub fn spec(&self) -> &SpeciesParameters {
        &self.spec
    }

    pub fn susceptible_count(&self) -> usize {
        self.susceptibles.len()
    }

    pub fn infected_count(&self) -> usize {
        self.infecteds.len()
    }

    pub fn recovered_count(&self) -> usize {
        self.recovereds.len()
    }

    pub fn total_count(&self) -> usize {
        self.susceptibles.len() + self.infecteds.len() + self.recovereds.len()
    }

    /// Current infection of the infected host at the given position.
    pub fn infection_at(&self, index: usize) -> Option<VirusId> {
        self.infecteds[index].infection()
    }

    /// Populate the compartments for a fresh run. The per-deme totals are
    /// scaled by this species' population fraction; infected hosts receive
    /// transmission copies of the founding virus, which start shedding when
    /// the deme carries an environment.
    #[allow(clippy::too_many_arguments)]
    pub fn create_hosts(
        &mut self,
        deme: usize,
        initial_s: usize,
        initial_i: usize,
        initial_r: usize,
        ur_virus: VirusId,
        ur_immunity: &PhenotypeRef,
        date: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        mut environment: Option<&mut Environment>,
        rng: &mut impl Rng,
    ) {
        let susceptible = (initial_s as f64 * self.spec.fraction) as usize;
        let infected = (initial_i as f64 * self.spec.fraction) as usize;
        let recovered = (initial_r as f64 * self.spec.fraction) as usize;

        for _ in 0..susceptible {
            self.susceptibles.push(Host::new(params, ur_immunity, rng));
        }
        for _ in 0..infected {
            let virus = ancestry.transmit(ur_virus, deme, date);
            if let Some(environment) = environment.as_deref_mut() {
                ancestry.get_mut(virus).host_infected();
                environment.add(virus, ancestry);
            }
            self.infecteds
                .push(Host::with_infection(virus, params, ur_immunity, rng));
        }
        for _ in 0..recovered {
            self.recovereds.push(Host::new(params, ur_immunity, rng));
        }
    }

    /// Add Poisson-drawn births to the susceptible pool, but only while the
    /// day of year falls strictly inside the brood window.
    pub fn grow(
        &mut self,
        day_of_year: u32,
        params: &Parameters,
        ur_immunity: &PhenotypeRef,
        rng: &mut impl Rng,
    ) {
        if self.spec.brood_start < day_of_year && day_of_year < self.spec.brood_end {
            let rate = self.total_count() as f64 * self.spec.brood_birth_rate() * params.delta_t;
            let births = random::poisson_count(rate, rng);
            for _ in 0..births {
                self.susceptibles.push(Host::new(params, ur_immunity, rng));
            }
        }
    }

    /// Remove Poisson-drawn deaths from every compartment. A host that dies
    /// while infected releases its lineage's shedding count.
    pub fn decline(
        &mut self,
        params: &Parameters,
        ancestry: &mut Ancestry,
        mut environment: Option<&mut Environment>,
        rng: &mut impl Rng,
    ) {
        let death_rate = self.spec.death_rate;
        for compartment in [
            &mut self.susceptibles,
            &mut self.infecteds,
            &mut self.recovereds,
        ] {
            let rate = compartment.len() as f64 * death_rate * params.delta_t;
            let mut deaths = random::poisson_count(rate, rng);
            while deaths > 0 && !compartment.is_empty() {
                let index = rng.gen_range(0..compartment.len());
                let mut host = compartment.swap_remove(index);
                host.reset(ancestry, environment.as_deref_mut());
                deaths -= 1;
            }
        }
    }

    /// Swap demography: recycle recovered hosts into naive susceptibles at
    /// the species' birth rate, holding the population size constant.
    pub fn make_susceptible(
        &mut self,
        params: &Parameters,
        ancestry: &mut Ancestry,
        mut environment: Option<&mut Environment>,
        rng: &mut impl Rng,
    ) {
        let rate = self.recovered_count() as f64 * self.spec.birth_rate * params.delta_t;
        let conversions = random::poisson_count(rate, rng);
        for _ in 0..conversions {
            if self.recovereds.is_empty() {
                break;
            }
            let index = rng.gen_range(0..self.recovereds.len());
            let mut host = self.recovereds.swap_remove(index);
            host.reset(ancestry, environment.as_deref_mut());
            self.susceptibles.push(host);
        }
    }

    /// Attempt to infect the susceptible host at the given position with a
    /// virus. Success is a Bernoulli draw against the host's risk of
    /// infection; on success the host moves to the infected compartment.
    #[allow(clippy::too_many_arguments)]
    pub fn infect(
        &mut self,
        sus_index: usize,
        source: VirusId,
        deme: usize,
        date: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        environment: Option<&mut Environment>,
        rng: &mut impl Rng,
    ) -> bool {
        let risk = {
            let host = &self.susceptibles[sus_index];
            ancestry
                .get(source)
                .phenotype()
                .risk_of_infection(host.history(), params)
        };
        if !random::coin(risk, rng) {
            return false;
        }
        let mut host = self.susceptibles.swap_remove(sus_index);
        host.infect(source, deme, date, ancestry, environment);
        self.infecteds.push(host);
        true
    }

    /// End the infective period of the host at the given position. The
    /// transcendental flag decides whether the host recovers into R or
    /// returns to the susceptible pool.
    pub fn recover(
        &mut self,
        inf_index: usize,
        params: &Parameters,
        ancestry: &mut Ancestry,
        environment: Option<&mut Environment>,
    ) {
        let mut host = self.infecteds.swap_remove(inf_index);
        host.clear_infection(ancestry, environment);
        if params.transcendental {
            self.recovereds.push(host);
        } else {
            self.susceptibles.push(host);
        }
    }

    /// Move a recovered host back into the susceptible pool.
    pub fn lose_immunity(&mut self, rec_index: usize) {
        let host = self.recovereds.swap_remove(rec_index);
        self.susceptibles.push(host);
    }

    /// Vaccinate a susceptible host, moving it straight into R.
    pub fn vaccinate(&mut self, sus_index: usize) {
        let host = self.susceptibles.swap_remove(sus_index);
        self.recovereds.push(host);
    }

    /// Remove an infected host, releasing its lineage's shedding count.
    pub fn cull(
        &mut self,
        inf_index: usize,
        ancestry: &mut Ancestry,
        environment: Option<&mut Environment>,
    ) {
        let mut host = self.infecteds.swap_remove(inf_index);
        host.reset(ancestry, environment);
    }

    /// Mutate the infection of the host at the given position.
    pub fn mutate(
        &mut self,
        inf_index: usize,
        date: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        environment: Option<&mut Environment>,
        rng: &mut impl Rng,
    ) {
        self.infecteds[inf_index].mutate_infection(date, params, ancestry, environment, rng);
    }

    /// Mark the ancestry of every current infection as trunk.
    pub fn make_trunk(&self, ancestry: &mut Ancestry) {
        for host in &self.infecteds {
            if let Some(virus) = host.infection() {
                ancestry.make_trunk_from(virus);
            }
        }
    }

    /// Install an imported host into the compartment matching its state.
    /// The checkpoint format does not record compartments, so uninfected
    /// hosts land in the susceptible pool regardless of their history.
    pub fn restore_host(&mut self, host: Host) {
        if host.is_infected() {
            self.infecteds.push(host);
        } else {
            self.susceptibles.push(host);
        }
    }

    /// All hosts of this species, susceptibles first.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.susceptibles
            .iter()
            .chain(self.infecteds.iter())
            .chain(self.recovereds.iter())
    }

    pub fn clear(&mut self) {
        self.susceptibles.clear();
        self.infecteds.clear();
        self.recovereds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::rc::Rc;

    fn setup() -> (Parameters, Ancestry, PhenotypeRef, VirusId, SpeciesPopulation) {
        let mut params = Parameters::default();
        params.initial_pr_r = 0.0;
        let mut ancestry = Ancestry::new();
        let ur_immunity: PhenotypeRef = Rc::new(params.host_phenotype());
        let ur_virus = ancestry.seed(0, Rc::new(params.virus_phenotype()), 0.0);
        let species = SpeciesPopulation::new(params.demes[0].species[0].clone());
        (params, ancestry, ur_immunity, ur_virus, species)
    }

    #[test]
    fn compartments_partition_the_population() {
        let (params, mut ancestry, ur_immunity, ur_virus, mut species) = setup();
        let mut rng = StdRng::seed_from_u64(3);
        species.create_hosts(
            0,
            50,
            20,
            10,
            ur_virus,
            &ur_immunity,
            0.0,
            &params,
            &mut ancestry,
            None,
            &mut rng,
        );
        assert_eq!(species.total_count(), 80);

        // naive hosts face maximal risk, so this infection succeeds
        let source = ancestry.transmit(ur_virus, 0, 0.0);
        while !species.infect(0, source, 0, 0.1, &params, &mut ancestry, None, &mut rng) {}
        assert_eq!(species.total_count(), 80);
        assert_eq!(species.infected_count(), 21);

        species.recover(0, &params, &mut ancestry, None);
        species.vaccinate(0);
        assert_eq!(species.total_count(), 80);

        species.cull(0, &mut ancestry, None);
        assert_eq!(species.total_count(), 79);
        assert_eq!(species.infected_count(), 19);

        species.grow(50, &params, &ur_immunity, &mut rng);
        species.decline(&params, &mut ancestry, None, &mut rng);
        assert!(species.total_count() > 0);
    }

    #[test]
    fn recovery_branches_on_transcendental_immunity() {
        let (mut params, mut ancestry, ur_immunity, ur_virus, mut species) = setup();
        let mut rng = StdRng::seed_from_u64(4);
        species.create_hosts(
            0,
            0,
            2,
            0,
            ur_virus,
            &ur_immunity,
            0.0,
            &params,
            &mut ancestry,
            None,
            &mut rng,
        );

        params.transcendental = false;
        species.recover(0, &params, &mut ancestry, None);
        assert_eq!(species.susceptible_count(), 1);
        assert_eq!(species.recovered_count(), 0);

        params.transcendental = true;
        species.recover(0, &params, &mut ancestry, None);
        assert_eq!(species.recovered_count(), 1);

        // the cleared phenotype landed in the host's history
        assert!(species.hosts().any(|host| !host.history().is_empty()));
    }

    #[test]
    fn mutation_changes_the_circulating_phenotype() {
        let (mut params, mut ancestry, ur_immunity, ur_virus, mut species) = setup();
        params.fixed_step = true;
        let mut rng = StdRng::seed_from_u64(5);
        species.create_hosts(
            0,
            0,
            1,
            0,
            ur_virus,
            &ur_immunity,
            0.0,
            &params,
            &mut ancestry,
            None,
            &mut rng,
        );
        let before = species.infection_at(0).unwrap();
        species.mutate(0, 0.5, &params, &mut ancestry, None, &mut rng);
        let after = species.infection_at(0).unwrap();
        assert_ne!(before, after);
        assert_eq!(ancestry.get(after).parent(), Some(before));
        let moved = ancestry.phenotype_distance(before, after);
        assert!((moved - params.mean_step).abs() < 1e-9);
    }

    #[test]
    fn brood_window_gates_births() {
        let (mut params, mut ancestry, ur_immunity, ur_virus, _) = setup();
        params.demes[0].species[0].brood_start = 100;
        params.demes[0].species[0].brood_end = 110;
        let mut species = SpeciesPopulation::new(params.demes[0].species[0].clone());
        let mut rng = StdRng::seed_from_u64(6);
        species.create_hosts(
            0,
            1000,
            0,
            0,
            ur_virus,
            &ur_immunity,
            0.0,
            &params,
            &mut ancestry,
            None,
            &mut rng,
        );
        let before = species.total_count();
        // outside the window, and on its boundary, nothing is born
        species.grow(50, &params, &ur_immunity, &mut rng);
        species.grow(100, &params, &ur_immunity, &mut rng);
        species.grow(110, &params, &ur_immunity, &mut rng);
        assert_eq!(species.total_count(), before);
    }
}
