//! Genealogy reconstruction over the ancestry arena.
//!
//! During a run the arena only records parent links and sampled tips. The
//! operations here turn that raw material into a rooted, drawable tree:
//! prune the tip set, find the common ancestor of what remains and make it
//! the root, rebuild children lists, mark the trunk, lay the tree out and
//! collapse uninformative chains. Finally a set of population-genetic
//! statistics is estimated from random tip pairs.

use rand::Rng;

use itertools::Itertools;

use crate::ancestry::{Ancestry, VirusId};
use crate::config::Parameters;

/// Statistics derived from the reconstructed tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeSummary {
    /// Mean pairwise tree distance between sampled tips, in years.
    pub diversity: f64,
    /// Time back to the most recent common ancestor: half the maximum
    /// sampled pair distance.
    pub tmrca: f64,
    /// Effective population size times generation time, estimated from the
    /// coalescence rate; non-finite when no sampled pair coalesced.
    pub netau: f64,
    /// Mean interval between a tip's birth and its parent's birth.
    pub serial_interval: f64,
    /// Mean pairwise antigenic distance between sampled tips.
    pub antigenic_diversity: f64,
    /// Phenotypic divergence rate on the trunk relative to side branches;
    /// NaN without a trunk.
    pub divergence_ratio: f64,
}

impl Ancestry {
    /// Reduce the registered tips to the configured per-deme retention.
    ///
    /// Each tip survives with probability `treeProportion ×
    /// tipSamplesPerDeme / (tips in its deme)`, capped at one.
    pub fn prune_tips(&mut self, params: &Parameters, rng: &mut impl Rng) {
        let deme_counts = self.tips.iter().map(|&tip| self.get(tip).deme()).counts();
        let target = params.tree_proportion * params.tip_samples_per_deme as f64;

        let mut retained = Vec::new();
        for index in 0..self.tips.len() {
            let tip = self.tips[index];
            let count = deme_counts[&self.get(tip).deme()] as f64;
            let keep = (target / count).min(1.0);
            if rng.gen_range(0.0..1.0) < keep {
                retained.push(tip);
            }
        }
        log::debug!(
            "Pruned tips from {} to {} samples.",
            self.tips.len(),
            retained.len()
        );
        self.tips = retained;
    }

    /// Walk every retained tip's ancestor chain, marking visited nodes and
    /// counting coverage; the most recent node covered by all tips becomes
    /// the root and material strictly above it is cut away.
    ///
    /// Fewer than two tips, or tips without a common ancestor, yield an
    /// empty tree (`None`).
    pub fn mark_and_reroot(&mut self) -> Option<VirusId> {
        for node in &mut self.nodes {
            node.marked = false;
            node.coverage = 0;
            node.children.clear();
        }
        self.root = None;

        if self.tips.len() < 2 {
            return None;
        }

        for index in 0..self.tips.len() {
            let mut current = Some(self.tips[index]);
            while let Some(id) = current {
                let node = &mut self.nodes[id.index()];
                node.marked = true;
                node.coverage += 1;
                current = node.parent;
            }
        }

        let full_coverage = self.tips.len() as u32;
        let mut current = self.tips[0];
        loop {
            if self.nodes[current.index()].coverage == full_coverage {
                break;
            }
            match self.nodes[current.index()].parent {
                Some(parent) => current = parent,
                None => return None,
            }
        }

        self.nodes[current.index()].parent = None;
        self.root = Some(current);
        Some(current)
    }

    /// Rebuild children lists by registering every retained node as a child
    /// of its parent. Idempotent: a child is added at most once even when
    /// it is reached through several tip paths.
    pub fn fill_backward(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        for index in 0..self.tips.len() {
            let mut child = self.tips[index];
            while child != root {
                let Some(parent) = self.nodes[child.index()].parent else {
                    break;
                };
                let parent_node = &mut self.nodes[parent.index()];
                if !parent_node.children.contains(&child) {
                    parent_node.children.push(child);
                }
                child = parent;
            }
        }
    }

    /// Mark the ancestry of one end-of-run infection as trunk, stopping at
    /// the first node that is already trunk or at a root.
    pub fn make_trunk_from(&mut self, id: VirusId) {
        let mut current = id;
        loop {
            let node = &mut self.nodes[current.index()];
            if node.trunk {
                break;
            }
            node.trunk = true;
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    /// Number of tip descendants below every node of the reconstructed tree.
    fn descendant_tip_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.nodes.len()];
        let Some(root) = self.root else {
            return counts;
        };
        let mut stack = vec![(root, false)];
        while let Some((id, processed)) = stack.pop() {
            if processed {
                let node = &self.nodes[id.index()];
                counts[id.index()] = if node.children.is_empty() {
                    1
                } else {
                    node.children.iter().map(|c| counts[c.index()]).sum()
                };
            } else {
                stack.push((id, true));
                for &child in &self.nodes[id.index()].children {
                    stack.push((child, false));
                }
            }
        }
        counts
    }

    /// Order every children list by descendant-tip count. The sort is
    /// stable, so ties keep their original insertion order.
    pub fn sort_children_by_descendants(&mut self) {
        let counts = self.descendant_tip_counts();
        for node in &mut self.nodes {
            node.children.sort_by_key(|child| counts[child.index()]);
        }
    }

    /// Assign each node a drawable y-coordinate: tips get consecutive
    /// positions in depth-first order, internal nodes sit at the mean of
    /// their children.
    pub fn set_layout_by_descendants(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let mut next_tip = 0.0;
        let mut stack = vec![(root, false)];
        while let Some((id, processed)) = stack.pop() {
            if processed {
                let count = self.nodes[id.index()].children.len();
                let sum: f64 = self.nodes[id.index()]
                    .children
                    .iter()
                    .map(|child| self.nodes[child.index()].layout)
                    .sum();
                self.nodes[id.index()].layout = sum / count as f64;
            } else if self.nodes[id.index()].children.is_empty() {
                self.nodes[id.index()].layout = next_tip;
                next_tip += 1.0;
            } else {
                stack.push((id, true));
                for index in (0..self.nodes[id.index()].children.len()).rev() {
                    stack.push((self.nodes[id.index()].children[index], false));
                }
            }
        }
    }

    /// Collapse chains of single-child internal nodes. Branch lengths are
    /// implicit in birth times, so splicing a pass-through node preserves
    /// the cumulative length of the chain.
    pub fn streamline(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for slot in 0..self.nodes[id.index()].children.len() {
                let mut child = self.nodes[id.index()].children[slot];
                while self.nodes[child.index()].children.len() == 1 {
                    child = self.nodes[child.index()].children[0];
                }
                self.nodes[id.index()].children[slot] = child;
                self.nodes[child.index()].parent = Some(id);
                stack.push(child);
            }
        }
    }

    /// Every node of the reconstructed tree in depth-first order, starting
    /// at the root.
    pub fn reconstructed_nodes(&self) -> Vec<VirusId> {
        let mut nodes = Vec::new();
        let Some(root) = self.root else {
            return nodes;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            nodes.push(id);
            for &child in self.nodes[id.index()].children.iter().rev() {
                stack.push(child);
            }
        }
        nodes
    }

    /// Estimate tree statistics from random tip pairs.
    pub fn tree_summary(
        &self,
        params: &Parameters,
        end_date: f64,
        rng: &mut impl Rng,
    ) -> TreeSummary {
        let mut summary = TreeSummary::default();
        summary.divergence_ratio = f64::NAN;
        if self.root.is_none() || self.tips.len() < 2 {
            return summary;
        }

        let window = params.netau_window as f64 / 365.0;
        let count = params.diversity_sampling_count;
        let mut coalescence_count = 0.0;
        let mut coalescence_opportunity = 0.0;
        let mut serial_samples = 0usize;

        for _ in 0..count {
            let a = self.tips[rng.gen_range(0..self.tips.len())];
            let b = self.tips[rng.gen_range(0..self.tips.len())];
            let dist = self.distance(a, b);
            summary.diversity += dist;
            if dist > summary.tmrca {
                summary.tmrca = dist;
            }
            summary.antigenic_diversity += self.antigenic_distance(a, b, params);
            coalescence_opportunity += window;
            coalescence_count += self.coalescence(a, b, window);
            if let Some(interval) = self.serial_interval(a) {
                summary.serial_interval += interval;
                serial_samples += 1;
            }
        }

        summary.diversity /= count as f64;
        summary.tmrca /= 2.0;
        summary.antigenic_diversity /= count as f64;
        summary.netau = coalescence_opportunity / coalescence_count;
        if serial_samples > 0 {
            summary.serial_interval /= serial_samples as f64;
        }
        summary.divergence_ratio = self.divergence_ratio(params, end_date);
        summary
    }

    /// Phenotypic divergence rate along the trunk relative to side
    /// branches, restricted to branches older than `yearsFromMK` before the
    /// end date. NaN when the trunk is empty or either side has no support.
    fn divergence_ratio(&self, params: &Parameters, end_date: f64) -> f64 {
        let Some(root) = self.root else {
            return f64::NAN;
        };
        let cutoff = end_date - params.years_from_mk;
        let mut trunk_distance = 0.0;
        let mut trunk_time = 0.0;
        let mut side_distance = 0.0;
        let mut side_time = 0.0;

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.index()];
            for &child_id in &node.children {
                stack.push(child_id);
                let child = &self.nodes[child_id.index()];
                if child.birth >= cutoff {
                    continue;
                }
                let distance = child.phenotype.distance(&node.phenotype);
                let time = child.birth - node.birth;
                if child.trunk && node.trunk {
                    trunk_distance += distance;
                    trunk_time += time;
                } else {
                    side_distance += distance;
                    side_time += time;
                }
            }
        }

        if trunk_time <= 0.0 || side_time <= 0.0 || side_distance <= 0.0 {
            return f64::NAN;
        }
        (trunk_distance / trunk_time) / (side_distance / side_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ancestry::Ancestry;
    use crate::phenotype::{PhenotypeRef, PhenotypeSpace};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::rc::Rc;

    fn phenotype() -> PhenotypeRef {
        Rc::new(PhenotypeSpace::Geometric.make(0.0, 0.0))
    }

    /// Root with two clades: a two-tip fork behind a pass-through node,
    /// and a single long branch.
    fn sample_tree() -> (Ancestry, VirusId, Vec<VirusId>) {
        let mut ancestry = Ancestry::new();
        let seed = ancestry.seed(0, phenotype(), -1.0);
        let root = ancestry.transmit(seed, 0, 0.0);
        let pass_through = ancestry.transmit(root, 0, 0.5);
        let fork = ancestry.transmit(pass_through, 0, 1.0);
        let tip_a = ancestry.transmit(fork, 0, 2.0);
        let tip_b = ancestry.transmit(fork, 0, 2.5);
        let tip_c = ancestry.transmit(root, 0, 3.0);
        for tip in [tip_a, tip_b, tip_c] {
            ancestry.register_tip(tip);
        }
        (ancestry, root, vec![tip_a, tip_b, tip_c])
    }

    #[test]
    fn reroot_finds_the_sample_mrca() {
        let (mut ancestry, root, _tips) = sample_tree();
        assert_eq!(ancestry.mark_and_reroot(), Some(root));
        // material above the root is discarded
        assert_eq!(ancestry.get(root).parent(), None);
    }

    #[test]
    fn too_few_tips_yield_an_empty_tree() {
        let mut ancestry = Ancestry::new();
        let seed = ancestry.seed(0, phenotype(), 0.0);
        assert_eq!(ancestry.mark_and_reroot(), None);
        ancestry.register_tip(seed);
        assert_eq!(ancestry.mark_and_reroot(), None);

        let mut rng = StdRng::seed_from_u64(0);
        let summary = ancestry.tree_summary(&Parameters::default(), 0.0, &mut rng);
        assert_eq!(summary.diversity, 0.0);
        assert_eq!(summary.tmrca, 0.0);
        assert!(summary.divergence_ratio.is_nan());
    }

    #[test]
    fn fill_backward_is_idempotent() {
        let (mut ancestry, root, tips) = sample_tree();
        ancestry.mark_and_reroot();
        ancestry.fill_backward();
        let first: Vec<Vec<VirusId>> = ancestry
            .reconstructed_nodes()
            .iter()
            .map(|&id| ancestry.get(id).children().to_vec())
            .collect();
        ancestry.fill_backward();
        let second: Vec<Vec<VirusId>> = ancestry
            .reconstructed_nodes()
            .iter()
            .map(|&id| ancestry.get(id).children().to_vec())
            .collect();
        assert_eq!(first, second);
        assert_eq!(ancestry.get(root).children().len(), 2);
        for tip in tips {
            assert!(ancestry.get(tip).is_tip());
        }
    }

    #[test]
    fn layout_orders_tips_and_averages_internals() {
        let (mut ancestry, root, tips) = sample_tree();
        ancestry.mark_and_reroot();
        ancestry.fill_backward();
        ancestry.sort_children_by_descendants();
        ancestry.set_layout_by_descendants();

        // the lone branch (one descendant tip) sorts before the fork (two)
        let layouts: Vec<f64> = tips.iter().map(|&tip| ancestry.get(tip).layout()).collect();
        assert_eq!(ancestry.get(tips[2]).layout(), 0.0);
        assert!(layouts.iter().all(|&y| (0.0..3.0).contains(&y)));
        let root_layout = ancestry.get(root).layout();
        assert!(root_layout > 0.0 && root_layout < 2.0);
    }

    #[test]
    fn streamline_splices_single_child_chains() {
        let (mut ancestry, root, tips) = sample_tree();
        ancestry.mark_and_reroot();
        ancestry.fill_backward();
        ancestry.streamline();

        // the pass-through node between root and the fork's tips survives
        // only where it branches; single-child chains are gone
        for &id in &ancestry.reconstructed_nodes() {
            let node = ancestry.get(id);
            assert!(node.children().len() != 1 || id == root);
        }
        // cumulative branch length is preserved through birth times
        assert_eq!(ancestry.distance(tips[0], tips[1]), 2.5);
    }

    #[test]
    fn trunk_walk_stops_at_marked_nodes() {
        let (mut ancestry, root, tips) = sample_tree();
        ancestry.mark_and_reroot();
        ancestry.fill_backward();
        ancestry.make_trunk_from(tips[0]);
        ancestry.make_trunk_from(tips[1]);
        assert!(ancestry.get(root).is_trunk());
        assert!(ancestry.get(tips[0]).is_trunk());
        assert!(ancestry.get(tips[1]).is_trunk());
        assert!(!ancestry.get(tips[2]).is_trunk());
    }

    #[test]
    fn pruning_caps_the_tip_count() {
        let mut ancestry = Ancestry::new();
        let root = ancestry.seed(0, phenotype(), 0.0);
        for step in 0..100 {
            let tip = ancestry.transmit(root, 0, step as f64);
            ancestry.register_tip(tip);
        }
        let mut params = Parameters::default();
        params.tip_samples_per_deme = 10;
        params.tree_proportion = 1.0;
        let mut rng = StdRng::seed_from_u64(7);
        ancestry.prune_tips(&params, &mut rng);
        assert!(ancestry.tips().len() < 100);
    }
}
