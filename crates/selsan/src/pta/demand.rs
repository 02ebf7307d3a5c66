use std::borrow::Cow;
use std::cell::{Cell, RefCell};

use bitvec::vec::BitVec;
use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::ir::Value;

use super::andersen::Solver;
use super::pag::{NodeId, NodeKind, ObjectKind, Pag};
use super::{ObjectId, PointsTo, PointsToOracle};

/// Inclusion-based analysis that only solves the part of the graph a query
/// depends on.
///
/// Answers agree with [`Andersen`](super::Andersen). Every node solved along
/// the way is cached, so later queries touching the same region are free.
pub struct DemandDriven {
    pag: Pag,
    copy_srcs: HashMap<NodeId, Vec<NodeId>>,
    load_ptrs: HashMap<NodeId, Vec<NodeId>>,
    params: HashSet<NodeId>,
    site_callees: HashMap<NodeId, NodeId>,
    cache: RefCell<HashMap<NodeId, PointsTo>>,
    queries: Cell<usize>,
}

impl DemandDriven {
    pub fn new(pag: Pag) -> Self {
        let mut copy_srcs = HashMap::<_, Vec<_>>::new();
        let mut load_ptrs = HashMap::<_, Vec<_>>::new();

        for &(src, dst) in &pag.copies {
            copy_srcs.entry(dst).or_default().push(src);
        }

        for &(ptr, dst) in &pag.loads {
            load_ptrs.entry(dst).or_default().push(ptr);
        }

        let params = pag
            .func_sigs()
            .flat_map(|(_, sig)| sig.params.iter().flatten().copied())
            .collect();

        let site_callees = pag
            .call_sites
            .iter()
            .filter_map(|site| Some((site.ret?, site.callee)))
            .collect();

        Self {
            pag,
            copy_srcs,
            load_ptrs,
            params,
            site_callees,
            cache: Default::default(),
            queries: Cell::new(0),
        }
    }

    pub fn pag(&self) -> &Pag {
        &self.pag
    }

    /// The number of queries that had to run the solver.
    pub fn solved_queries(&self) -> usize {
        self.queries.get()
    }

    pub fn node_points_to(&self, node: NodeId) -> PointsTo {
        if let Some(pts) = self.cache.borrow().get(&node) {
            return pts.clone();
        }

        self.queries.set(self.queries.get() + 1);

        let mut active = BitVec::repeat(false, self.pag.node_count());
        let mut pending = vec![node];
        let mut rounds = 0;

        let pts = loop {
            rounds += 1;
            self.expand(&mut active, &mut pending);
            let pts = Solver::new(&self.pag, Some(&active)).solve();
            pending = self.dynamic_deps(&active, &pts);

            if pending.is_empty() {
                break pts;
            }
        };

        trace!(
            "query for node {} touched {} nodes in {rounds} rounds",
            node.index(),
            active.count_ones()
        );

        let mut cache = self.cache.borrow_mut();

        for idx in active.iter_ones() {
            cache.insert(NodeId::from_index(idx), pts[idx].clone());
        }

        pts[node.index()].clone()
    }

    /// Marks the nodes whose sets the pending nodes depend on regardless of
    /// what anything points to.
    fn expand(&self, active: &mut BitVec, pending: &mut Vec<NodeId>) {
        while let Some(node) = pending.pop() {
            if active[node.index()] {
                continue;
            }

            active.set(node.index(), true);
            pending.extend(self.copy_srcs.get(&node).into_iter().flatten());
            pending.extend(self.load_ptrs.get(&node).into_iter().flatten());

            if let Some(&callee) = self.site_callees.get(&node) {
                pending.push(callee);
            }

            if let NodeKind::Content(_) = self.pag.node(node) {
                pending.extend(self.pag.stores.iter().map(|&(_, ptr)| ptr));
            }

            if self.params.contains(&node) {
                pending.extend(self.pag.call_sites.iter().map(|site| site.callee));
            }
        }
    }

    /// Collects the nodes that the current solution reveals as dependencies
    /// of active nodes but that are not active yet.
    fn dynamic_deps(&self, active: &BitVec, pts: &[PointsTo]) -> Vec<NodeId> {
        let pag = &self.pag;
        let is_active = |node: NodeId| active[node.index()];
        let mut deps = vec![];

        for &(ptr, dst) in &pag.loads {
            if is_active(dst) {
                deps.extend(pts[ptr.index()].iter().map(|obj| pag.content(obj)));
            }
        }

        for &(src, ptr) in &pag.stores {
            if pts[ptr.index()].iter().any(|obj| is_active(pag.content(obj))) {
                deps.push(src);
            }
        }

        for site in &pag.call_sites {
            for obj in pts[site.callee.index()].iter() {
                let ObjectKind::Func(func_id) = pag.object(obj) else {
                    continue;
                };
                let Some(sig) = pag.func_sig(func_id) else {
                    continue;
                };

                for (&arg, &param) in site.args.iter().zip(&sig.params) {
                    if let (Some(arg), Some(param)) = (arg, param) {
                        if is_active(param) {
                            deps.push(arg);
                        }
                    }
                }

                if let (Some(ret), Some(result)) = (sig.ret, site.ret) {
                    if is_active(result) {
                        deps.push(ret);
                    }
                }
            }
        }

        deps.retain(|&node| !is_active(node));
        deps.sort();
        deps.dedup();

        deps
    }
}

impl PointsToOracle for DemandDriven {
    fn has_record(&self, value: Value) -> bool {
        self.pag.value_node(value).is_some()
    }

    fn points_to(&self, value: Value) -> Cow<'_, PointsTo> {
        Cow::Owned(
            self.pag
                .value_node(value)
                .map(|node| self.node_points_to(node))
                .unwrap_or_default(),
        )
    }

    fn resolve_object(&self, obj: ObjectId) -> Option<Value> {
        self.pag.object(obj).value()
    }

    fn object_count(&self) -> usize {
        self.pag.object_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    const PROGRAM: &str = "
        define @f() {
        entry:
          %a = alloca ptr
          %b = alloca i64
          store %b, %a
          %v = load ptr, %a
          %x = alloca i64
          %y = getelementptr %x, 4
          ret void
        }
    ";

    #[test]
    fn test_query_solves_dependencies_only() {
        let module = parse(PROGRAM).unwrap();
        let demand = DemandDriven::new(Pag::build(&module).unwrap());
        let v = |path| module.find_value(path).unwrap();

        let y = demand.points_to(v("f/%y"));
        assert_eq!(
            y.iter().filter_map(|obj| demand.resolve_object(obj)).collect::<Vec<_>>(),
            vec![v("f/%x")]
        );
        assert_eq!(demand.solved_queries(), 1);

        // %x was solved as a dependency of %y
        demand.points_to(v("f/%x"));
        assert_eq!(demand.solved_queries(), 1);

        let loaded = demand.points_to(v("f/%v"));
        assert_eq!(
            loaded.iter().filter_map(|obj| demand.resolve_object(obj)).collect::<Vec<_>>(),
            vec![v("f/%b")]
        );
        assert_eq!(demand.solved_queries(), 2);
    }
}
