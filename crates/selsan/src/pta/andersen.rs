use std::borrow::Cow;
use std::collections::VecDeque;

use bitvec::vec::BitVec;
use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::ir::{FuncId, Value};

use super::pag::{NodeId, ObjectKind, Pag};
use super::{ObjectId, PointsTo, PointsToOracle};

/// An inclusion-based constraint solver with on-the-fly call graph
/// construction.
///
/// When `active` is given, only the marked nodes are solved for: no edge is
/// added towards an inactive node.
pub(super) struct Solver<'a> {
    pag: &'a Pag,
    active: Option<&'a BitVec>,
    pts: Vec<PointsTo>,
    succs: Vec<Vec<NodeId>>,
    edges: HashSet<(NodeId, NodeId)>,
    loads: HashMap<NodeId, Vec<NodeId>>,
    stores: HashMap<NodeId, Vec<NodeId>>,
    calls: HashMap<NodeId, Vec<usize>>,
    resolved: HashSet<(usize, FuncId)>,
    worklist: VecDeque<NodeId>,
    queued: BitVec,
}

impl<'a> Solver<'a> {
    pub fn new(pag: &'a Pag, active: Option<&'a BitVec>) -> Self {
        let mut loads = HashMap::<_, Vec<_>>::new();
        let mut stores = HashMap::<_, Vec<_>>::new();
        let mut calls = HashMap::<_, Vec<_>>::new();

        for &(ptr, dst) in &pag.loads {
            loads.entry(ptr).or_default().push(dst);
        }

        for &(src, ptr) in &pag.stores {
            stores.entry(ptr).or_default().push(src);
        }

        for (idx, site) in pag.call_sites.iter().enumerate() {
            calls.entry(site.callee).or_default().push(idx);
        }

        Self {
            pag,
            active,
            pts: vec![PointsTo::new(); pag.node_count()],
            succs: vec![vec![]; pag.node_count()],
            edges: Default::default(),
            loads,
            stores,
            calls,
            resolved: Default::default(),
            worklist: Default::default(),
            queued: BitVec::repeat(false, pag.node_count()),
        }
    }

    pub fn solve(mut self) -> Vec<PointsTo> {
        let pag = self.pag;

        for &(node, obj) in &pag.addrs {
            self.add_object(node, obj);
        }

        for &(src, dst) in &pag.copies {
            self.add_edge(src, dst);
        }

        let mut iterations = 0usize;

        while let Some(node) = self.pop() {
            iterations += 1;
            let objs = self.pts[node.index()].iter().collect::<Vec<_>>();

            if let Some(dsts) = self.loads.get(&node).cloned() {
                for &obj in &objs {
                    for &dst in &dsts {
                        self.add_edge(pag.content(obj), dst);
                    }
                }
            }

            if let Some(srcs) = self.stores.get(&node).cloned() {
                for &obj in &objs {
                    for &src in &srcs {
                        self.add_edge(src, pag.content(obj));
                    }
                }
            }

            if let Some(sites) = self.calls.get(&node).cloned() {
                for &obj in &objs {
                    if let ObjectKind::Func(func_id) = pag.object(obj) {
                        for &site in &sites {
                            self.connect(site, func_id);
                        }
                    }
                }
            }

            for succ in self.succs[node.index()].clone() {
                self.propagate(node, succ);
            }
        }

        trace!(
            "solved {} nodes in {iterations} iterations, {} edges",
            self.pts.len(),
            self.edges.len()
        );

        self.pts
    }

    fn is_active(&self, node: NodeId) -> bool {
        self.active.map_or(true, |active| active[node.index()])
    }

    fn push(&mut self, node: NodeId) {
        if !self.queued[node.index()] {
            self.queued.set(node.index(), true);
            self.worklist.push_back(node);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let node = self.worklist.pop_front()?;
        self.queued.set(node.index(), false);

        Some(node)
    }

    fn add_object(&mut self, node: NodeId, obj: ObjectId) {
        if self.is_active(node) && self.pts[node.index()].insert(obj) {
            self.push(node);
        }
    }

    fn add_edge(&mut self, src: NodeId, dst: NodeId) {
        if !self.is_active(dst) || !self.edges.insert((src, dst)) {
            return;
        }

        self.succs[src.index()].push(dst);
        self.propagate(src, dst);
    }

    fn propagate(&mut self, src: NodeId, dst: NodeId) {
        if src == dst {
            return;
        }

        let pts = self.pts[src.index()].clone();

        if self.pts[dst.index()].union_with(&pts) {
            self.push(dst);
        }
    }

    fn connect(&mut self, site_idx: usize, func_id: FuncId) {
        if !self.resolved.insert((site_idx, func_id)) {
            return;
        }

        let pag = self.pag;
        let site = &pag.call_sites[site_idx];
        let Some(sig) = pag.func_sig(func_id) else {
            return;
        };

        if sig.external {
            if let Some(ret) = site.ret {
                self.add_object(ret, pag.unknown());
            }

            return;
        }

        for (&arg, &param) in site.args.iter().zip(&sig.params) {
            if let (Some(arg), Some(param)) = (arg, param) {
                self.add_edge(arg, param);
            }
        }

        if let (Some(ret), Some(result)) = (sig.ret, site.ret) {
            self.add_edge(ret, result);
        }
    }
}

/// Whole-program inclusion-based analysis, solved eagerly.
pub struct Andersen {
    pag: Pag,
    pts: Vec<PointsTo>,
}

impl Andersen {
    pub fn new(pag: Pag) -> Self {
        let pts = Solver::new(&pag, None).solve();

        Self { pag, pts }
    }

    pub fn pag(&self) -> &Pag {
        &self.pag
    }

    pub fn node_points_to(&self, node: NodeId) -> &PointsTo {
        &self.pts[node.index()]
    }
}

impl PointsToOracle for Andersen {
    fn has_record(&self, value: Value) -> bool {
        self.pag.value_node(value).is_some()
    }

    fn points_to(&self, value: Value) -> Cow<'_, PointsTo> {
        match self.pag.value_node(value) {
            Some(node) => Cow::Borrowed(self.node_points_to(node)),
            None => Cow::Owned(PointsTo::new()),
        }
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

    #[test]
    fn test_store_load_through_cycle() {
        let module = parse(
            "define @f() {
             entry:
               %a = alloca ptr
               %b = alloca i64
               store %b, %a
               br label %loop
             loop:
               %p = phi ptr [%a, %entry], [%q, %loop]
               %q = getelementptr %p, 0
               %v = load ptr, %q
               br label %loop
             }",
        )
        .unwrap();
        let pag = Pag::build(&module).unwrap();
        let andersen = Andersen::new(pag);
        let v = |path| module.find_value(path).unwrap();

        let resolved = |path| {
            andersen
                .points_to(v(path))
                .iter()
                .filter_map(|obj| andersen.resolve_object(obj))
                .collect::<Vec<_>>()
        };

        assert_eq!(resolved("f/%p"), vec![v("f/%a")]);
        assert_eq!(resolved("f/%q"), vec![v("f/%a")]);
        assert_eq!(resolved("f/%v"), vec![v("f/%b")]);
    }

    #[test]
    fn test_indirect_call_to_declaration() {
        let module = parse(
            "declare @malloc(i64) -> ptr #allocator
             define @f() {
             entry:
               %fp = alloca ptr
               store @malloc, %fp
               %g = load ptr, %fp
               %r = call ptr %g(8)
               ret void
             }",
        )
        .unwrap();
        let andersen = Andersen::new(Pag::build(&module).unwrap());
        let pts = andersen.points_to(module.find_value("f/%r").unwrap());

        assert_eq!(
            pts.iter().collect::<Vec<_>>(),
            vec![andersen.pag().unknown()]
        );
    }
}
