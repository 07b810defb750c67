//! Definition of Octree.
//!
//! The [Octree] is an arena of [OctreeNode]s keyed by their [MortonKey]. Relations between
//! nodes are handles into the arena, rebound in bulk at the end of every [Octree::regrid].
//! The cycle entry points borrow the whole arena for the duration of a pass, so the
//! topology cannot change while messages are in flight.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use futures::FutureExt;
use tracing::{debug, error, info};

use crate::{
    client::{Mailboxes, NodeClient},
    constants::{DEEPEST_LEVEL, NCHILD, NF},
    error::{Error, Result},
    geometry::{Direction, Face, Octant, PhysicalBox},
    grid::{Grid, GridPatch},
    kernel::{GsolveType, InteractionKernel, MonopoleKernel},
    moments::SpaceVector,
    morton::MortonKey,
    node::{OctreeNode, Relations},
    scheduler::{drive, Phase},
};

/// An adaptive octree of grid patches.
pub struct Octree<G = Grid, K = MonopoleKernel> {
    nodes: BTreeMap<MortonKey, OctreeNode<G>>,
    kernel: K,
    domain: PhysicalBox,
    max_level: usize,
    aborted: bool,
}

impl<G: GridPatch, K: InteractionKernel> Octree<G, K> {
    /// Create a tree consisting of a root patch filled by `init`.
    ///
    /// # Arguments
    /// - `domain`: The physical domain covered by the root.
    /// - `max_level`: The maximum level a regrid may refine to. At most `DEEPEST_LEVEL`.
    /// - `kernel`: The interaction kernel of the gravity pass.
    /// - `init`: The conserved fields as a function of the cell centre.
    pub fn new(
        domain: PhysicalBox,
        max_level: usize,
        kernel: K,
        init: &dyn Fn(SpaceVector) -> [f64; NF],
    ) -> Self {
        assert!(max_level as u64 <= DEEPEST_LEVEL);
        let root = MortonKey::root();
        let mut grid = G::new(root, &domain);
        grid.set_problem(init);
        grid.set_root();

        let mut tree = Self {
            nodes: BTreeMap::from([(root, OctreeNode::new(root, grid))]),
            kernel,
            domain,
            max_level,
            aborted: false,
        };
        tree.rebind();
        tree
    }

    /// Return the nodes in key order.
    pub fn nodes(&self) -> &BTreeMap<MortonKey, OctreeNode<G>> {
        &self.nodes
    }

    /// Mutable iterator over all nodes in key order.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut OctreeNode<G>> {
        self.nodes.values_mut()
    }

    /// The node at `key`.
    pub fn node(&self, key: MortonKey) -> Option<&OctreeNode<G>> {
        self.nodes.get(&key)
    }

    /// Mutable access to the node at `key`.
    pub fn node_mut(&mut self, key: MortonKey) -> Option<&mut OctreeNode<G>> {
        self.nodes.get_mut(&key)
    }

    /// Return the leaf keys.
    pub fn leaf_keys(&self) -> Vec<MortonKey> {
        self.nodes
            .values()
            .filter(|node| !node.is_refined())
            .map(|node| node.location())
            .collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has a root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deepest level present in the tree.
    pub fn depth(&self) -> usize {
        self.nodes.keys().map(|key| key.level()).max().unwrap_or(0)
    }

    /// Return the bounding box.
    pub fn domain(&self) -> &PhysicalBox {
        &self.domain
    }

    /// Maximum level of refinement.
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// The interaction kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// True once a cycle failed.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Fill the conserved fields of every patch from `init`.
    pub fn set_problem(&mut self, init: &dyn Fn(SpaceVector) -> [f64; NF]) {
        for node in self.nodes.values_mut() {
            node.grid_mut().set_problem(init);
        }
    }

    /// Apply `f` to every node in key order. The first error aborts the tree.
    pub fn for_each_node<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut OctreeNode<G>) -> Result<()>,
    {
        self.check_aborted()?;
        let result = self.nodes.values_mut().try_for_each(&mut f);
        self.settle(result)
    }

    /// Mark the tree as aborted after a failure elsewhere.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    fn check_aborted(&self) -> Result<()> {
        if self.aborted {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(error = %e, "Aborting octree");
            self.aborted = true;
        }
        result
    }

    /// Run one hydro exchange cycle on every node.
    pub fn run_hydro_exchange_cycle(&mut self) -> Result<()> {
        self.check_aborted()?;
        let tasks = self.nodes.values_mut().map(|node| {
            (
                node.location(),
                node.run_hydro_exchange_cycle().boxed_local(),
            )
        });
        let result = drive(Phase::Hydro, tasks);
        self.settle(result)
    }

    /// Exchange flux corrections between aunts and nieces.
    pub fn exchange_flux_corrections(&mut self) -> Result<()> {
        self.check_aborted()?;
        let tasks = self.nodes.values_mut().map(|node| {
            (
                node.location(),
                node.exchange_flux_corrections().boxed_local(),
            )
        });
        let result = drive(Phase::FluxCorrection, tasks);
        self.settle(result)
    }

    /// Run one gravity pass on every node.
    pub fn run_gravity_pass(&mut self, kind: GsolveType, do_energy_accounting: bool) -> Result<()> {
        self.check_aborted()?;
        let kernel: &dyn InteractionKernel = &self.kernel;
        let tasks = self.nodes.values_mut().map(move |node| {
            (
                node.location(),
                node.run_gravity_pass(kind, do_energy_accounting, kernel)
                    .boxed_local(),
            )
        });
        let result = drive(Phase::Gravity, tasks);
        self.settle(result)
    }

    /// Refine and coarsen the tree.
    ///
    /// A node below `max_level` ends up refined if `criterion` holds for it or one of its
    /// children ends up refined. The refined set is then closed so that neighbouring leaves
    /// differ by at most one level. A leaf refines by at most one level per call.
    /// New children are prolonged from their parent, coarsened nodes restrict their
    /// children. All relations are rebound and checked afterwards.
    pub fn regrid<F>(&mut self, criterion: F) -> Result<()>
    where
        F: Fn(&OctreeNode<G>) -> bool,
    {
        self.check_aborted()?;
        let result = self.regrid_impl(criterion);
        self.settle(result)
    }

    fn regrid_impl<F>(&mut self, criterion: F) -> Result<()>
    where
        F: Fn(&OctreeNode<G>) -> bool,
    {
        // Descendants come before their ancestors in reverse key order.
        let mut refine = BTreeSet::<MortonKey>::new();
        for (&key, node) in self.nodes.iter().rev() {
            if key.level() >= self.max_level {
                continue;
            }
            let child_refined =
                node.is_refined() && key.children().iter().any(|c| refine.contains(c));
            if child_refined || criterion(node) {
                refine.insert(key);
            }
        }

        // 2:1 balance: the parent of every neighbour location of a refined node is refined.
        let mut work = refine.iter().copied().collect::<Vec<_>>();
        while let Some(key) = work.pop() {
            if key.level() == 0 {
                continue;
            }
            for (_, neighbor) in key.neighbors() {
                let mut ancestor = neighbor.parent();
                while refine.insert(ancestor) {
                    work.push(ancestor);
                    if ancestor.level() == 0 {
                        break;
                    }
                    ancestor = ancestor.parent();
                }
            }
        }
        if let Some(missing) = refine.iter().find(|key| !self.nodes.contains_key(*key)) {
            return Err(Error::Topology(format!(
                "balancing requires refining {} which does not exist",
                missing
            )));
        }

        // Coarsen deepest first so that restricted children are leaves.
        let mut coarsen = self
            .nodes
            .iter()
            .filter(|(key, node)| node.is_refined() && !refine.contains(*key))
            .map(|(&key, _)| key)
            .collect::<Vec<_>>();
        coarsen.sort_by_key(|key| Reverse(key.level()));
        for &key in &coarsen {
            let mut blocks = Vec::with_capacity(NCHILD);
            for octant in Octant::full_set() {
                let child_key = key.child(octant);
                let child = self.nodes.remove(&child_key).ok_or_else(|| {
                    Error::Topology(format!("refined node {} misses child {}", key, child_key))
                })?;
                child.mailboxes().close();
                blocks.push((octant, child.grid().get_restrict()));
            }
            let node = self
                .nodes
                .get_mut(&key)
                .ok_or_else(|| Error::Topology(format!("coarsened node {} vanished", key)))?;
            let mut outflows = [0.0; NF];
            for (octant, data) in blocks {
                node.grid_mut().set_restrict(&data, octant);
                let (_, child_outflows) = data.split_at(data.len().saturating_sub(NF));
                for (o, v) in outflows.iter_mut().zip(child_outflows) {
                    *o += v;
                }
            }
            node.grid_mut().set_outflows(outflows);
            node.set_refined(false);
            debug!(location = %key, "Coarsened");
        }

        // New children are leaves, so the order of refinement does not matter.
        let split = refine
            .iter()
            .filter(|key| self.nodes.get(*key).is_some_and(|node| !node.is_refined()))
            .copied()
            .collect::<Vec<_>>();
        for &key in &split {
            let node = self
                .nodes
                .get_mut(&key)
                .ok_or_else(|| Error::Topology(format!("refined node {} vanished", key)))?;
            node.set_refined(true);
            let mut children = Octant::full_set().map(|octant| node.new_child(octant, &self.domain));
            // The first child inherits the outflows so the next restriction reproduces them.
            children[0].grid_mut().set_outflows(node.grid().outflows());
            for child in children {
                self.nodes.insert(child.location(), child);
            }
            debug!(location = %key, "Refined");
        }

        self.rebind();
        self.check_topology()?;
        info!(
            nodes = self.nodes.len(),
            refined = split.len(),
            coarsened = coarsen.len(),
            depth = self.depth(),
            "Regrid finished"
        );
        Ok(())
    }

    /// Replace every mailbox and recompute all relations from the keys in the arena.
    fn rebind(&mut self) {
        let existing = self.nodes.keys().copied().collect::<BTreeSet<_>>();
        let refined = self
            .nodes
            .values()
            .filter(|node| node.is_refined())
            .map(|node| node.location())
            .collect::<BTreeSet<_>>();
        for node in self.nodes.values() {
            node.mailboxes().close();
        }
        let mailboxes = existing
            .iter()
            .map(|&key| (key, Arc::new(Mailboxes::new())))
            .collect::<BTreeMap<_, _>>();
        let client = |key: MortonKey| {
            mailboxes
                .get(&key)
                .map(|boxes| NodeClient::new(key, boxes.clone()))
        };
        // A location inside the domain that is not in the tree is covered by a coarser leaf.
        let is_coarser = |location: Option<MortonKey>| {
            location.is_some_and(|location| !existing.contains(&location))
        };

        for ((&key, node), boxes) in self.nodes.iter_mut().zip(mailboxes.values()) {
            let is_refined = refined.contains(&key);
            let parent = if key.level() > 0 {
                client(key.parent())
            } else {
                None
            };
            let children = if is_refined {
                key.children()
                    .iter()
                    .map(|&child| client(child))
                    .collect::<Option<Vec<_>>>()
                    .and_then(|children| children.try_into().ok())
            } else {
                None
            };
            let neighbors =
                Direction::full_set().map(|dir| key.neighbor(dir).and_then(|nb| client(nb)));
            let amr_inbound = Direction::full_set().map(|dir| is_coarser(key.neighbor(dir)));
            let aunts = Face::full_set().map(|face| {
                let location = key.neighbor(face.to_direction());
                if is_coarser(location) {
                    location.and_then(|location| client(location.parent()))
                } else {
                    None
                }
            });
            let nieces = Face::full_set().map(|face| {
                !is_refined
                    && key
                        .neighbor(face.to_direction())
                        .is_some_and(|nb| refined.contains(&nb))
            });
            let amr_flags = Octant::full_set().map(|octant| {
                Direction::full_set()
                    .map(|dir| is_refined && is_coarser(key.child(octant).neighbor(dir)))
            });

            node.bind(Relations {
                mailboxes: boxes.clone(),
                parent,
                children,
                neighbors,
                aunts,
                nieces,
                amr_flags,
                amr_inbound,
            });
        }
    }

    /// Verify the relations of every node.
    ///
    /// Checks parent and child handles, neighbour symmetry, the 2:1 balance, aunt and
    /// niece symmetry and the consistency of the AMR flags with the inbound flags of
    /// the children.
    pub fn check_topology(&self) -> Result<()> {
        let fail = |key: MortonKey, what: String| Err(Error::Topology(format!("{}: {}", key, what)));
        let handle_ok = |client: Option<&NodeClient>, expected: Option<MortonKey>| match (
            client, expected,
        ) {
            (None, None) => true,
            (Some(client), Some(expected)) => {
                client.location() == expected
                    && self
                        .nodes
                        .get(&expected)
                        .is_some_and(|node| client.is_bound_to(node.mailboxes()))
            }
            _ => false,
        };

        for (&key, node) in &self.nodes {
            if node.mailboxes().is_closed() {
                return fail(key, "closed mailboxes".to_string());
            }

            // Parent and children.
            if key.level() > 0 {
                let parent = key.parent();
                if !self.nodes.get(&parent).is_some_and(|p| p.is_refined()) {
                    return fail(key, format!("parent {} missing or not refined", parent));
                }
                if !handle_ok(node.parent(), Some(parent)) {
                    return fail(key, "bad parent handle".to_string());
                }
            } else if node.parent().is_some() {
                return fail(key, "root with a parent".to_string());
            }
            let children_present = key
                .children()
                .iter()
                .filter(|child| self.nodes.contains_key(*child))
                .count();
            match (node.is_refined(), node.children()) {
                (true, Some(children)) if children_present == NCHILD => {
                    for (client, child) in children.iter().zip(key.children()) {
                        if !handle_ok(Some(client), Some(child)) {
                            return fail(key, format!("bad handle to child {}", child));
                        }
                    }
                }
                (false, None) if children_present == 0 => {}
                _ => return fail(key, "partially refined".to_string()),
            }

            // Neighbours, symmetric by construction of the expectation.
            for dir in Direction::full_set() {
                let location = key.neighbor(dir);
                let expected = location.filter(|nb| self.nodes.contains_key(nb));
                if !handle_ok(node.neighbor(dir), expected) {
                    return fail(key, format!("bad neighbour handle in {}", dir));
                }
                if let Some(nb) = expected {
                    let back = self.nodes.get(&nb).and_then(|n| n.neighbor(dir.flip()));
                    if back.map(|c| c.location()) != Some(key) {
                        return fail(key, format!("asymmetric neighbour {}", nb));
                    }
                }
                let coarser = location.is_some() && expected.is_none();
                if coarser {
                    let covering = location.map(|nb| nb.parent());
                    if !covering.is_some_and(|c| self.nodes.contains_key(&c)) {
                        return fail(key, format!("unbalanced in {}", dir));
                    }
                }
                if node.amr_inbound(dir) != coarser {
                    return fail(key, format!("bad inbound flag in {}", dir));
                }
            }

            // Aunts and nieces.
            for face in Face::full_set() {
                let dir = face.to_direction();
                match node.aunt(face) {
                    Some(aunt) => {
                        let aunt_node = self.nodes.get(&aunt.location());
                        let parent_neighbor = key.parent().neighbor(dir);
                        if !aunt_node.is_some_and(|a| a.has_nieces(face.flip()))
                            || parent_neighbor != Some(aunt.location())
                        {
                            return fail(key, format!("asymmetric aunt {}", aunt.location()));
                        }
                    }
                    None => {
                        if node.amr_inbound(dir) {
                            return fail(key, format!("missing aunt across face {}", face.index()));
                        }
                    }
                }
                if node.has_nieces(face) {
                    let Some(nb) = key.neighbor(dir) else {
                        return fail(key, "nieces outside of the domain".to_string());
                    };
                    if node.is_refined() {
                        return fail(key, "refined node with nieces".to_string());
                    }
                    // Children of the neighbour that touch the shared face.
                    let side = face.flip().get_side();
                    let dim = face.get_dimension();
                    for niece in nb
                        .children()
                        .into_iter()
                        .filter(|c| c.child_index().get_side(dim) == side.index())
                    {
                        let aunt = self.nodes.get(&niece).and_then(|n| n.aunt(face.flip()));
                        if aunt.map(|a| a.location()) != Some(key) {
                            return fail(key, format!("niece {} does not see its aunt", niece));
                        }
                    }
                }
            }

            // AMR flags of a parent mirror the inbound flags of its children.
            if node.is_refined() {
                for (octant, child) in Octant::full_set().into_iter().zip(key.children()) {
                    let Some(child_node) = self.nodes.get(&child) else {
                        return fail(key, format!("missing child {}", child));
                    };
                    for dir in Direction::full_set() {
                        if node.amr_flag(octant, dir) != child_node.amr_inbound(dir) {
                            return fail(key, format!("amr flag mismatch for {} in {}", child, dir));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::Octree;
    use crate::{
        constants::{NF, RHO_I},
        geometry::{Direction, Face, Octant, PhysicalBox, Side},
        error::Error,
        grid::Grid,
        kernel::MonopoleKernel,
        morton::MortonKey,
        node::{OctreeNode, Relations},
    };

    fn uniform(_: [f64; 3]) -> [f64; NF] {
        let mut values = [0.0; NF];
        values[RHO_I] = 1.0;
        values
    }

    fn tree(max_level: usize) -> Octree<Grid, MonopoleKernel> {
        Octree::new(
            PhysicalBox::cube(1.0),
            max_level,
            MonopoleKernel::new(1.0),
            &uniform,
        )
    }

    #[test]
    fn test_new_tree_is_a_lone_root() {
        let tree = tree(2);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.leaf_keys(), vec![MortonKey::root()]);
        tree.check_topology().unwrap();
    }

    #[test]
    fn test_refine_root() {
        let mut tree = tree(2);
        tree.regrid(|node| node.location().level() == 0).unwrap();
        assert_eq!(tree.len(), 9);
        let children = MortonKey::root().children();
        for &child in &children {
            let node = tree.node(child).unwrap();
            assert_eq!(node.parent().unwrap().location(), MortonKey::root());
            // Every child sees its seven siblings.
            let count = Direction::full_set()
                .iter()
                .filter(|&&dir| node.neighbor(dir).is_some())
                .count();
            assert_eq!(count, 7);
            assert!(Face::full_set().iter().all(|&f| node.aunt(f).is_none()));
        }
    }

    #[test]
    fn test_one_refined_child_has_aunts_and_nieces() {
        let mut tree = tree(2);
        let c0 = MortonKey::root().child(Octant::from_index(0));
        let c1 = MortonKey::root().child(Octant::from_index(1));
        tree.regrid(|node| node.location().level() == 0).unwrap();
        tree.regrid(|node| node.location() == c0).unwrap();
        assert_eq!(tree.len(), 17);

        let grandchild = MortonKey::from_index_and_level([1, 0, 0], 2);
        let node = tree.node(grandchild).unwrap();
        let xplus = Face::new(0, Side::Plus);
        assert_eq!(node.aunt(xplus).unwrap().location(), c1);
        assert!(node.amr_inbound(xplus.to_direction()));
        assert!(tree.node(c1).unwrap().has_nieces(xplus.flip()));
        assert!(tree
            .node(c0)
            .unwrap()
            .amr_flag(Octant::from_index(1), xplus.to_direction()));
    }

    #[test]
    fn test_coarsen_back_to_root() {
        let mut tree = tree(2);
        tree.regrid(|node| node.location().level() == 0).unwrap();
        tree.regrid(|node| node.location().level() <= 1).unwrap();
        assert_eq!(tree.len(), 1 + 8 + 64);
        tree.regrid(|_| false).unwrap();
        assert_eq!(tree.len(), 1);
        let total = tree.node(MortonKey::root()).unwrap().grid().interior_total(RHO_I);
        assert!((total - 8.0).abs() < 1E-12);
    }

    #[test]
    fn test_balance_refines_neighbouring_parents() {
        let mut tree = tree(3);
        let c0 = MortonKey::root().child(Octant::from_index(0));
        let target = MortonKey::from_index_and_level([1, 1, 1], 2);
        let criterion = |node: &crate::node::OctreeNode<Grid>| {
            let key = node.location();
            key == MortonKey::root() || key == c0 || key == target
        };
        tree.regrid(criterion).unwrap();
        tree.regrid(criterion).unwrap();
        tree.regrid(criterion).unwrap();
        // Every level one node touches a neighbour of the target.
        assert_eq!(tree.len(), 1 + 8 + 64 + 8);
        for child in MortonKey::root().children() {
            assert!(tree.node(child).unwrap().is_refined());
        }
        tree.check_topology().unwrap();
    }

    #[test]
    fn test_max_level_caps_refinement() {
        let mut tree = tree(1);
        for _ in 0..3 {
            tree.regrid(|_| true).unwrap();
        }
        assert_eq!(tree.depth(), 1);
    }

    fn relations_of(node: &OctreeNode<Grid>) -> Relations {
        Relations {
            mailboxes: node.mailboxes().clone(),
            parent: node.parent().cloned(),
            children: node.children().cloned(),
            neighbors: Direction::full_set().map(|dir| node.neighbor(dir).cloned()),
            aunts: Face::full_set().map(|face| node.aunt(face).cloned()),
            nieces: Face::full_set().map(|face| node.has_nieces(face)),
            amr_flags: Octant::full_set()
                .map(|octant| Direction::full_set().map(|dir| node.amr_flag(octant, dir))),
            amr_inbound: Direction::full_set().map(|dir| node.amr_inbound(dir)),
        }
    }

    #[test]
    fn test_rebinding_unchanged_relations_keeps_the_topology() {
        let mut tree = tree(2);
        tree.regrid(|node| node.location().level() == 0).unwrap();
        let c3 = MortonKey::root().child(Octant::from_index(3));
        let node = tree.node_mut(c3).unwrap();
        let relations = relations_of(node);
        node.bind(relations);
        tree.check_topology().unwrap();
    }

    #[test]
    fn test_asymmetric_neighbour_is_a_topology_error() {
        let mut tree = tree(2);
        tree.regrid(|node| node.location().level() == 0).unwrap();
        let c0 = MortonKey::root().child(Octant::from_index(0));
        let node = tree.node_mut(c0).unwrap();
        let mut relations = relations_of(node);
        relations.neighbors = std::array::from_fn(|_| None);
        node.bind(relations);
        assert!(matches!(tree.check_topology(), Err(Error::Topology(_))));
    }

    #[test]
    fn test_wrong_amr_flag_is_a_topology_error() {
        let mut tree = tree(2);
        tree.regrid(|node| node.location().level() == 0).unwrap();
        let root = tree.node_mut(MortonKey::root()).unwrap();
        let mut relations = relations_of(root);
        let xplus = Face::new(0, Side::Plus).to_direction();
        relations.amr_flags[0][xplus.index()] = true;
        root.bind(relations);
        assert!(matches!(tree.check_topology(), Err(Error::Topology(_))));
    }

    #[test]
    fn test_missing_aunt_is_a_topology_error() {
        let mut tree = tree(2);
        let c0 = MortonKey::root().child(Octant::from_index(0));
        tree.regrid(|node| node.location().level() == 0).unwrap();
        tree.regrid(|node| node.location() == c0).unwrap();
        let grandchild = MortonKey::from_index_and_level([1, 0, 0], 2);
        let node = tree.node_mut(grandchild).unwrap();
        let mut relations = relations_of(node);
        relations.aunts = std::array::from_fn(|_| None);
        node.bind(relations);
        assert!(matches!(tree.check_topology(), Err(Error::Topology(_))));
    }

    #[test]
    fn test_handles_from_before_a_regrid_are_closed() {
        let mut tree = tree(2);
        let c0 = MortonKey::root().child(Octant::from_index(0));
        tree.regrid(|node| node.location().level() == 0).unwrap();
        let stale = tree.node(c0).unwrap().parent().cloned().unwrap();
        assert!(stale
            .send_hydro_children(vec![0.0], Octant::from_index(0), 5)
            .is_ok());

        // The same structure is rebound with fresh mailboxes.
        tree.regrid(|node| node.location().level() == 0).unwrap();
        assert_eq!(tree.len(), 9);
        assert!(matches!(
            stale.send_hydro_children(vec![0.0], Octant::from_index(0), 6),
            Err(Error::ChannelClosed)
        ));
        let fresh = tree.node(c0).unwrap().parent().cloned().unwrap();
        assert!(fresh
            .send_hydro_children(vec![0.0], Octant::from_index(0), 6)
            .is_ok());

        // A coarsened child's handle to its former parent is closed as well.
        let stale = fresh;
        tree.regrid(|_| false).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(matches!(
            stale.send_hydro_children(vec![0.0], Octant::from_index(0), 7),
            Err(Error::ChannelClosed)
        ));
    }
}
