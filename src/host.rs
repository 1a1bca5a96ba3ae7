//! An individual host harbouring at most one infection and an immune
//! history of previously cleared phenotypes.

use std::rc::Rc;

use rand::Rng;
use smallvec::SmallVec;

use crate::ancestry::{Ancestry, VirusId};
use crate::config::Parameters;
use crate::environment::Environment;
use crate::errors::EpidriftError;
use crate::phenotype::{Phenotype, PhenotypeRef};
use crate::random;

/// Ordered list of cleared phenotypes. Insertion order is irrelevant to
/// risk comparisons but preserved for checkpoint round-tripping.
pub type ImmuneHistory = SmallVec<[PhenotypeRef; 4]>;

#[derive(Debug, Default)]
pub struct Host {
    infection: Option<VirusId>,
    history: ImmuneHistory,
}

impl Host {
    /// A fresh host, carrying the pre-existing immunity phenotype with the
    /// configured probability.
    pub fn new(params: &Parameters, ur_immunity: &PhenotypeRef, rng: &mut impl Rng) -> Self {
        let mut host = Self::default();
        if random::coin(params.initial_pr_r, rng) {
            host.history.push(Rc::clone(ur_immunity));
        }
        host
    }

    /// A fresh host carrying an initial infection.
    pub fn with_infection(
        infection: VirusId,
        params: &Parameters,
        ur_immunity: &PhenotypeRef,
        rng: &mut impl Rng,
    ) -> Self {
        let mut host = Self::new(params, ur_immunity, rng);
        host.infection = Some(infection);
        host
    }

    pub fn is_infected(&self) -> bool {
        self.infection.is_some()
    }

    pub fn infection(&self) -> Option<VirusId> {
        self.infection
    }

    pub fn history(&self) -> &[PhenotypeRef] {
        &self.history
    }

    pub fn add_to_history(&mut self, phenotype: PhenotypeRef) {
        self.history.push(phenotype);
    }

    /// Replace the current infection with a transmission copy of the source
    /// lineage. When an environment tracks this deme, the copy starts
    /// shedding and is registered with the reservoir the moment its
    /// shedding count reaches one.
    pub fn infect(
        &mut self,
        source: VirusId,
        deme: usize,
        date: f64,
        ancestry: &mut Ancestry,
        environment: Option<&mut Environment>,
    ) {
        let infection = ancestry.transmit(source, deme, date);
        self.infection = Some(infection);
        if let Some(environment) = environment {
            ancestry.get_mut(infection).host_infected();
            if ancestry.get(infection).hosts_shedding() == 1 {
                environment.add(infection, ancestry);
            }
        }
    }

    /// Clear the current infection, appending its phenotype to the immune
    /// history and releasing the shedding count when tracked.
    pub fn clear_infection(
        &mut self,
        ancestry: &mut Ancestry,
        environment: Option<&mut Environment>,
    ) {
        if let Some(infection) = self.infection.take() {
            let phenotype = Rc::clone(ancestry.get(infection).phenotype());
            self.history.push(phenotype);
            if environment.is_some() {
                ancestry.get_mut(infection).host_recovered();
            }
        }
    }

    /// Swap the current infection for a mutation copy. The shedding count
    /// moves atomically from the old lineage to the new one, and the new
    /// lineage enters the reservoir when its count transitions to one.
    pub fn mutate_infection(
        &mut self,
        date: f64,
        params: &Parameters,
        ancestry: &mut Ancestry,
        environment: Option<&mut Environment>,
        rng: &mut impl Rng,
    ) {
        if let Some(old) = self.infection {
            let mutant = ancestry.mutant(old, date, params, rng);
            self.infection = Some(mutant);
            if let Some(environment) = environment {
                ancestry.get_mut(old).host_recovered();
                ancestry.get_mut(mutant).host_infected();
                if ancestry.get(mutant).hosts_shedding() == 1 {
                    environment.add(mutant, ancestry);
                }
            }
        }
    }

    /// Return the host to a naive state: infection released, history
    /// cleared. Used by swap demography and by death and culling, where the
    /// host is dropped afterwards.
    pub fn reset(&mut self, ancestry: &mut Ancestry, environment: Option<&mut Environment>) {
        if let Some(infection) = self.infection.take() {
            if environment.is_some() {
                ancestry.get_mut(infection).host_recovered();
            }
        }
        self.history.clear();
    }

    /// Encode this host as `deme:phenotypeOrN:historyOrN`.
    pub fn checkpoint_line(&self, deme: usize, ancestry: &Ancestry) -> String {
        let infection = match self.infection {
            Some(id) => ancestry.get(id).phenotype().to_string(),
            None => "n".to_string(),
        };
        let history = if self.history.is_empty() {
            "n".to_string()
        } else {
            self.history
                .iter()
                .map(|phenotype| phenotype.to_string())
                .collect::<Vec<_>>()
                .join(";")
        };
        format!("{deme}:{infection}:{history}")
    }

    /// Parse a checkpoint line back into a host and its deme. A present
    /// infection is recreated as a copy of the founding virus with the
    /// stored phenotype.
    pub fn from_checkpoint_line(
        line: &str,
        params: &Parameters,
        ur_virus: VirusId,
        date: f64,
        ancestry: &mut Ancestry,
    ) -> Result<(usize, Host), EpidriftError> {
        let mut fields = line.trim().splitn(3, ':');
        let (Some(deme), Some(infection), Some(history)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(EpidriftError::CheckpointError(format!(
                "malformed host line `{line}`"
            )));
        };
        let deme: usize = deme.parse().map_err(|_| {
            EpidriftError::CheckpointError(format!("invalid deme in host line `{line}`"))
        })?;

        let mut host = Host::default();
        if infection != "n" {
            let phenotype = Rc::new(Phenotype::parse(infection, params.phenotype_space)?);
            host.infection = Some(ancestry.derive(ur_virus, deme, phenotype, date));
        }
        if history != "n" {
            for token in history.split(';') {
                host.history
                    .push(Rc::new(Phenotype::parse(token, params.phenotype_space)?));
            }
        }
        Ok((deme, host))
    }
}
