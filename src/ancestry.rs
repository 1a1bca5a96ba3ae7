//! Append-only arena of viral lineage nodes.
//!
//! Every seeding, transmission, or mutation event creates one [`Virus`]
//! node. Nodes are owned by the [`Ancestry`] arena and addressed through
//! copyable [`VirusId`] handles; parent and children relations are id
//! links, so the ancestor walks can use plain handle equality for their
//! visited sets. Nodes are never removed while a run is in progress —
//! pruning only reduces the registered tip set.

use std::collections::HashSet;
use std::rc::Rc;

use block_id::{Alphabet, BlockId};
use rand::Rng;

use crate::config::Parameters;
use crate::phenotype::PhenotypeRef;

thread_local! {
    static BLOCK_ID: BlockId<char> = BlockId::new(
        Alphabet::new(&("ABCDEFGHIJKLMNOPQRSTUVWXYZ".chars().collect::<Vec<char>>())),
        0,
        1,
    );
}

/// Stable handle to a lineage node in the [`Ancestry`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirusId(usize);

impl VirusId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// A single evolutionary event with its antigenic phenotype and ancestry.
#[derive(Debug)]
pub struct Virus {
    pub(crate) parent: Option<VirusId>,
    pub(crate) phenotype: PhenotypeRef,
    pub(crate) birth: f64,
    pub(crate) deme: usize,

    /// Number of hosts currently shedding this lineage; drives the
    /// environmental reservoir.
    pub(crate) hosts_shedding: u32,
    /// Raw number of virions of this lineage in the environment; can be
    /// astronomically large (order 1e12).
    pub(crate) volume: f64,

    // reconstruction state, written only by the tree pass and never read
    // by the transmission path
    pub(crate) children: Vec<VirusId>,
    pub(crate) marked: bool,
    pub(crate) trunk: bool,
    pub(crate) layout: f64,
    pub(crate) coverage: u32,
}

impl Virus {
    fn new(parent: Option<VirusId>, phenotype: PhenotypeRef, deme: usize, birth: f64) -> Self {
        Self {
            parent,
            phenotype,
            birth,
            deme,
            hosts_shedding: 0,
            volume: 0.0,
            children: Vec::new(),
            marked: false,
            trunk: false,
            layout: 0.0,
            coverage: 0,
        }
    }

    pub fn parent(&self) -> Option<VirusId> {
        self.parent
    }

    pub fn phenotype(&self) -> &PhenotypeRef {
        &self.phenotype
    }

    pub fn birth(&self) -> f64 {
        self.birth
    }

    pub fn deme(&self) -> usize {
        self.deme
    }

    pub fn hosts_shedding(&self) -> u32 {
        self.hosts_shedding
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }

    /// Inform this lineage that one more host is shedding it.
    pub fn host_infected(&mut self) {
        self.hosts_shedding += 1;
    }

    /// Inform this lineage that one of its hosts stopped shedding.
    pub fn host_recovered(&mut self) {
        debug_assert!(self.hosts_shedding > 0, "shedding count may not go negative");
        self.hosts_shedding = self.hosts_shedding.saturating_sub(1);
    }

    pub fn children(&self) -> &[VirusId] {
        &self.children
    }

    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_trunk(&self) -> bool {
        self.trunk
    }

    pub fn layout(&self) -> f64 {
        self.layout
    }
}

/// The forest of every lineage node created during a run.
#[derive(Debug, Default)]
pub struct Ancestry {
    pub(crate) nodes: Vec<Virus>,
    pub(crate) tips: Vec<VirusId>,
    pub(crate) root: Option<VirusId>,
}

impl Ancestry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: VirusId) -> &Virus {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: VirusId) -> &mut Virus {
        &mut self.nodes[id.0]
    }

    fn push(&mut self, virus: Virus) -> VirusId {
        let id = VirusId(self.nodes.len());
        self.nodes.push(virus);
        id
    }

    /// Create a lineage without a parent (de novo seeding).
    pub fn seed(&mut self, deme: usize, phenotype: PhenotypeRef, birth: f64) -> VirusId {
        self.push(Virus::new(None, phenotype, deme, birth))
    }

    /// Create a transmission copy: same phenotype, new deme and time.
    pub fn transmit(&mut self, source: VirusId, deme: usize, birth: f64) -> VirusId {
        let phenotype = Rc::clone(&self.nodes[source.0].phenotype);
        self.push(Virus::new(Some(source), phenotype, deme, birth))
    }

    /// Create a copy with an explicitly supplied phenotype.
    pub fn derive(
        &mut self,
        source: VirusId,
        deme: usize,
        phenotype: PhenotypeRef,
        birth: f64,
    ) -> VirusId {
        self.push(Virus::new(Some(source), phenotype, deme, birth))
    }

    /// Create a mutation copy: mutated phenotype, same deme.
    pub fn mutant(
        &mut self,
        source: VirusId,
        birth: f64,
        params: &Parameters,
        rng: &mut impl Rng,
    ) -> VirusId {
        let deme = self.nodes[source.0].deme;
        let phenotype = Rc::new(self.nodes[source.0].phenotype.mutate(params, rng));
        self.derive(source, deme, phenotype, birth)
    }

    /// Register a lineage as a sampled tip for tree reconstruction.
    pub fn register_tip(&mut self, id: VirusId) {
        self.tips.push(id);
    }

    pub fn tips(&self) -> &[VirusId] {
        &self.tips
    }

    pub fn root(&self) -> Option<VirusId> {
        self.root
    }

    /// Short textual identity of a node, used in output labels only.
    pub fn display_id(&self, id: VirusId) -> String {
        BLOCK_ID.with(|generator| generator.encode_string(id.0 as u64).unwrap())
    }

    /// Find the most recent common ancestor of two lineages.
    ///
    /// Both ancestor chains are walked simultaneously: each iteration
    /// advances exactly one unexhausted lineage, alternating between the
    /// two sides, recording visited nodes in a set. A repeated insertion
    /// signals the node where the chains meet, so the ancestor of a
    /// descendant is found rather than some older shared node. Returns
    /// `None` when the chains never intersect (separate seedings).
    pub fn common_ancestor(&self, a: VirusId, b: VirusId) -> Option<VirusId> {
        let mut visited: HashSet<VirusId> = HashSet::new();
        visited.insert(a);
        if !visited.insert(b) {
            return Some(b);
        }

        let mut lineage_a = a;
        let mut lineage_b = b;
        let mut advance_a = false;
        loop {
            let parent_a = self.nodes[lineage_a.0].parent;
            let parent_b = self.nodes[lineage_b.0].parent;
            let next = match (parent_a, parent_b) {
                (None, None) => return None,
                (Some(parent), None) => {
                    lineage_a = parent;
                    parent
                }
                (None, Some(parent)) => {
                    lineage_b = parent;
                    parent
                }
                (Some(parent_a), Some(parent_b)) => {
                    advance_a = !advance_a;
                    if advance_a {
                        lineage_a = parent_a;
                        parent_a
                    } else {
                        lineage_b = parent_b;
                        parent_b
                    }
                }
            };
            if !visited.insert(next) {
                return Some(next);
            }
        }
    }

    /// Tree distance between two lineages in birth-time units: the sum of
    /// both branch lengths down from the most recent common ancestor, or 0
    /// when no common ancestor exists.
    pub fn distance(&self, a: VirusId, b: VirusId) -> f64 {
        match self.common_ancestor(a, b) {
            Some(ancestor) => {
                let ancestor_birth = self.nodes[ancestor.0].birth;
                (self.nodes[a.0].birth - ancestor_birth) + (self.nodes[b.0].birth - ancestor_birth)
            }
            None => 0.0,
        }
    }

    /// Antigenic distance between the phenotypes of two lineages, mapped
    /// through the cross-immunity curve.
    pub fn antigenic_distance(&self, a: VirusId, b: VirusId, params: &Parameters) -> f64 {
        self.nodes[a.0]
            .phenotype
            .antigenic_distance(&self.nodes[b.0].phenotype, params)
    }

    /// Raw phenotypic distance between two lineages.
    pub fn phenotype_distance(&self, a: VirusId, b: VirusId) -> f64 {
        self.nodes[a.0].phenotype.distance(&self.nodes[b.0].phenotype)
    }

    /// Indicator for a coalescence event within a bounded time window.
    ///
    /// Each side walks its own ancestors only while their birth time stays
    /// within `window` of that side's starting birth — two independent
    /// bounded walks, not a shared horizon. Returns 1.0 when a common node
    /// is reached inside both windows, else 0.0.
    pub fn coalescence(&self, a: VirusId, b: VirusId, window: f64) -> f64 {
        let mut visited: HashSet<VirusId> = HashSet::new();

        let start = self.nodes[a.0].birth;
        let mut lineage = a;
        while let Some(parent) = self.nodes[lineage.0].parent {
            if self.nodes[parent.0].birth <= start - window {
                break;
            }
            visited.insert(parent);
            lineage = parent;
        }

        let start = self.nodes[b.0].birth;
        let mut lineage = b;
        while let Some(parent) = self.nodes[lineage.0].parent {
            if self.nodes[parent.0].birth <= start - window {
                break;
            }
            if !visited.insert(parent) {
                return 1.0;
            }
            lineage = parent;
        }

        0.0
    }

    /// Interval from a lineage's birth back to its parent's birth; `None`
    /// for root nodes.
    pub fn serial_interval(&self, id: VirusId) -> Option<f64> {
        self.nodes[id.0]
            .parent
            .map(|parent| self.nodes[id.0].birth - self.nodes[parent.0].birth)
    }

    /// Drop every node and tip, ready for a fresh run.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.tips.clear();
        self.root = None;
    }
}
