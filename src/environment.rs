//! Environmental reservoir of shed virus.
//!
//! Each deme may carry a pool of lineages shed by its infected hosts. Shed
//! virus decays under a seasonally modulated clearance rate and can infect
//! susceptible hosts without direct contact. The conceptual mechanism
//! follows Roche et al. (Infect. Genet. Evol. 9, 800, 2009).

use std::f64::consts::TAU;

use rand::Rng;

use crate::ancestry::{Ancestry, VirusId};
use crate::config::EnvironmentParameters;

/// Fixed horizon of the exponential-decay term of the volume recurrence,
/// in days.
const DECAY_HORIZON: f64 = 30.0;

#[derive(Debug)]
pub struct Environment {
    params: EnvironmentParameters,
    viruses: Vec<VirusId>,
}

impl Environment {
    pub fn new(params: EnvironmentParameters) -> Self {
        Self {
            params,
            viruses: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.viruses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viruses.is_empty()
    }

    pub fn up_take_rate(&self) -> f64 {
        self.params.up_take_rate
    }

    /// Track a lineage in the reservoir.
    ///
    /// A lineage is added exactly once, on the first timestep its shedding
    /// count transitions from zero to one.
    pub fn add(&mut self, id: VirusId, ancestry: &Ancestry) {
        debug_assert_eq!(
            ancestry.get(id).hosts_shedding(),
            1,
            "viruses enter the reservoir with their first shedding host"
        );
        debug_assert!(!self.viruses.contains(&id));
        self.viruses.push(id);
    }

    /// Update every tracked lineage's volume for the elapsed step and evict
    /// entries that dropped below the infective dose with no hosts left
    /// shedding them. Lineages with active shedders are never evicted.
    pub fn clear_viruses(
        &mut self,
        deme_offset: f64,
        date: f64,
        step: f64,
        ancestry: &mut Ancestry,
    ) {
        // seasonal modulation of the clearance rate, offset per deme
        let seasonal = (TAU * date + TAU * deme_offset).sin();
        let clear_rate = (1.0 + self.params.seasonal_amp * seasonal) / self.params.durability * step;
        let shed_rate = self.params.shedding_rate * step;

        let mut index = 0;
        while index < self.viruses.len() {
            let virus = ancestry.get_mut(self.viruses[index]);
            let shedders = virus.hosts_shedding() as f64;
            // equilibrium contribution of the current shedders plus decay of
            // the previous volume
            let volume =
                shed_rate * shedders / clear_rate + (-clear_rate * DECAY_HORIZON).exp() * virus.volume();
            virus.set_volume(volume);
            if volume < self.params.id50 && virus.hosts_shedding() == 0 {
                self.viruses.swap_remove(index);
            } else {
                index += 1;
            }
        }
    }

    /// Draw a uniformly random lineage from the reservoir; `None` when the
    /// reservoir is empty, which callers treat as "skip this contact".
    pub fn get_virus(&self, rng: &mut impl Rng) -> Option<VirusId> {
        if self.viruses.is_empty() {
            return None;
        }
        Some(self.viruses[rng.gen_range(0..self.viruses.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parameters;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::rc::Rc;

    fn environment(id50: f64) -> Environment {
        Environment::new(EnvironmentParameters {
            up_take_rate: 6.73,
            id50,
            durability: 20.0,
            seasonal_amp: 0.1,
            shedding_rate: 1e12,
        })
    }

    fn seeded(ancestry: &mut Ancestry) -> VirusId {
        let params = Parameters::default();
        ancestry.seed(0, Rc::new(params.virus_phenotype()), 0.0)
    }

    #[test]
    fn shedding_lineages_are_never_evicted() {
        let mut ancestry = Ancestry::new();
        let mut environment = environment(1e30);
        let id = seeded(&mut ancestry);
        ancestry.get_mut(id).host_infected();
        environment.add(id, &ancestry);

        // id50 far above any reachable volume, but a shedder remains
        for _ in 0..10 {
            environment.clear_viruses(0.0, 0.0, 1.0, &mut ancestry);
            assert_eq!(environment.len(), 1);
        }
    }

    #[test]
    fn stale_lineages_are_evicted_below_the_dose() {
        let mut ancestry = Ancestry::new();
        let mut environment = environment(1e30);
        let id = seeded(&mut ancestry);
        ancestry.get_mut(id).host_infected();
        environment.add(id, &ancestry);

        // the host stops shedding; volume sits below id50, so the next
        // clearance pass drops the entry
        ancestry.get_mut(id).host_recovered();
        environment.clear_viruses(0.0, 0.0, 1.0, &mut ancestry);
        assert!(environment.is_empty());
    }

    #[test]
    fn volumes_grow_with_shedders_and_decay_without() {
        let mut ancestry = Ancestry::new();
        let mut environment = environment(1.0);
        let id = seeded(&mut ancestry);
        ancestry.get_mut(id).host_infected();
        environment.add(id, &ancestry);

        environment.clear_viruses(0.0, 0.0, 1.0, &mut ancestry);
        let volume_while_shedding = ancestry.get(id).volume();
        assert!(volume_while_shedding > 1e12);

        ancestry.get_mut(id).host_recovered();
        environment.clear_viruses(0.0, 0.0, 1.0, &mut ancestry);
        assert!(ancestry.get(id).volume() < volume_while_shedding);
    }

    #[test]
    fn empty_reservoir_yields_no_virus() {
        let environment = environment(1.0);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(environment.get_virus(&mut rng), None);
    }
}
