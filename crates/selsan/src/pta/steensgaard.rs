use std::borrow::Cow;

use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::ir::{FuncId, Value};
use crate::util::try_match;

use super::pag::{NodeId, ObjectKind, Pag};
use super::{ObjectId, PointsTo, PointsToOracle};

/// Equivalence classes of pointers with a single pointee class each.
///
/// The first `Pag::node_count` elements stand for the graph's nodes; the rest
/// are anonymous classes created on demand.
#[derive(Debug, Default)]
struct Classes {
    parent: Vec<usize>,
    rank: Vec<u8>,
    pointee: Vec<Option<usize>>,
}

impl Classes {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
            pointee: vec![None; len],
        }
    }

    fn add(&mut self) -> usize {
        let elem = self.parent.len();
        self.parent.push(elem);
        self.rank.push(0);
        self.pointee.push(None);

        elem
    }

    fn find(&mut self, mut elem: usize) -> usize {
        while self.parent[elem] != elem {
            self.parent[elem] = self.parent[self.parent[elem]];
            elem = self.parent[elem];
        }

        elem
    }

    fn pointee(&mut self, elem: usize) -> usize {
        let root = self.find(elem);

        match self.pointee[root] {
            Some(pointee) => pointee,

            None => {
                let pointee = self.add();
                self.pointee[root] = Some(pointee);

                pointee
            }
        }
    }

    fn join(&mut self, lhs: usize, rhs: usize) {
        let mut pending = vec![(lhs, rhs)];

        while let Some((lhs, rhs)) = pending.pop() {
            let (lhs, rhs) = (self.find(lhs), self.find(rhs));

            if lhs == rhs {
                continue;
            }

            let (root, child) = if self.rank[lhs] < self.rank[rhs] {
                (rhs, lhs)
            } else {
                (lhs, rhs)
            };

            if self.rank[root] == self.rank[child] {
                self.rank[root] += 1;
            }

            self.parent[child] = root;

            match (self.pointee[root], self.pointee[child].take()) {
                (Some(lhs), Some(rhs)) => pending.push((lhs, rhs)),
                (None, child_pointee) => self.pointee[root] = child_pointee,
                (Some(_), None) => {}
            }
        }
    }

    fn join_pointees(&mut self, lhs: usize, rhs: usize) {
        let lhs = self.pointee(lhs);
        let rhs = self.pointee(rhs);
        self.join(lhs, rhs);
    }
}

/// Whole-program unification-based analysis.
///
/// Every assignment merges the pointee classes of both sides, so each
/// pointer's set is a superset of what [`Andersen`](super::Andersen) computes.
pub struct Steensgaard {
    pag: Pag,
    pts: Vec<Option<PointsTo>>,
}

impl Steensgaard {
    pub fn new(pag: Pag) -> Self {
        let mut classes = Classes::new(pag.node_count());

        for &(node, obj) in &pag.addrs {
            let pointee = classes.pointee(node.index());
            classes.join(pointee, pag.content(obj).index());
        }

        for &(src, dst) in &pag.copies {
            classes.join_pointees(src.index(), dst.index());
        }

        for &(ptr, dst) in &pag.loads {
            let cell = classes.pointee(ptr.index());
            classes.join_pointees(cell, dst.index());
        }

        for &(src, ptr) in &pag.stores {
            let cell = classes.pointee(ptr.index());
            classes.join_pointees(cell, src.index());
        }

        let rounds = Self::resolve_calls(&pag, &mut classes);
        trace!("resolved indirect calls in {rounds} rounds");

        let pts = Self::collect(&pag, &mut classes);

        Self { pag, pts }
    }

    /// Connects indirect call sites to the functions their callee class holds
    /// until no new callee shows up.
    fn resolve_calls(pag: &Pag, classes: &mut Classes) -> usize {
        let mut resolved = HashSet::<(usize, FuncId)>::new();
        let mut rounds = 0;

        loop {
            rounds += 1;
            let mut changed = false;

            let funcs = pag
                .objects()
                .filter_map(|(obj, kind)| {
                    try_match!(kind, ObjectKind::Func(func_id) => (obj, func_id))
                })
                .collect::<Vec<_>>();

            for (site_idx, site) in pag.call_sites.iter().enumerate() {
                let callee_class = classes.pointee(site.callee.index());

                for &(obj, func_id) in &funcs {
                    if classes.find(pag.content(obj).index()) != classes.find(callee_class)
                        || !resolved.insert((site_idx, func_id))
                    {
                        continue;
                    }

                    changed = true;

                    let Some(sig) = pag.func_sig(func_id) else {
                        continue;
                    };

                    if sig.external {
                        if let Some(ret) = site.ret {
                            let pointee = classes.pointee(ret.index());
                            classes.join(pointee, pag.content(pag.unknown()).index());
                        }

                        continue;
                    }

                    for (&arg, &param) in site.args.iter().zip(&sig.params) {
                        if let (Some(arg), Some(param)) = (arg, param) {
                            classes.join_pointees(arg.index(), param.index());
                        }
                    }

                    if let (Some(ret), Some(result)) = (sig.ret, site.ret) {
                        classes.join_pointees(ret.index(), result.index());
                    }
                }
            }

            if !changed {
                return rounds;
            }
        }
    }

    fn collect(pag: &Pag, classes: &mut Classes) -> Vec<Option<PointsTo>> {
        let mut by_class = HashMap::<usize, PointsTo>::new();

        for (obj, _) in pag.objects() {
            let class = classes.find(pag.content(obj).index());
            by_class.entry(class).or_default().insert(obj);
        }

        (0..pag.node_count())
            .map(|idx| {
                let root = classes.find(idx);
                let pointee = classes.find(classes.pointee[root]?);

                Some(by_class.get(&pointee).cloned().unwrap_or_default())
            })
            .collect()
    }

    pub fn pag(&self) -> &Pag {
        &self.pag
    }

    pub fn node_points_to(&self, node: NodeId) -> Option<&PointsTo> {
        self.pts[node.index()].as_ref()
    }
}

impl PointsToOracle for Steensgaard {
    fn has_record(&self, value: Value) -> bool {
        self.pag.value_node(value).is_some()
    }

    fn points_to(&self, value: Value) -> Cow<'_, PointsTo> {
        match self.pag.value_node(value).and_then(|node| self.node_points_to(node)) {
            Some(pts) => Cow::Borrowed(pts),
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
    fn test_classes_join_pointees() {
        let mut classes = Classes::new(4);
        let p0 = classes.pointee(0);
        let p1 = classes.pointee(1);
        classes.join(0, 1);

        assert_eq!(classes.find(0), classes.find(1));
        assert_eq!(classes.find(p0), classes.find(p1));
        assert_ne!(classes.find(2), classes.find(3));
    }

    #[test]
    fn test_copy_merges_targets() {
        let module = parse(
            "define @f(i1 %c) {
             entry:
               %a = alloca i64
               %b = alloca i64
               %s = select ptr %c, %a, %b
               %x = alloca i64
               ret void
             }",
        )
        .unwrap();
        let steensgaard = Steensgaard::new(Pag::build(&module).unwrap());
        let v = |path| module.find_value(path).unwrap();

        assert_eq!(steensgaard.points_to(v("f/%s")).len(), 2);
        assert_eq!(steensgaard.points_to(v("f/%a")).len(), 2);
        assert_eq!(steensgaard.points_to(v("f/%x")).len(), 1);
        assert!(!steensgaard.points_to(v("f/%a")).intersects(&steensgaard.points_to(v("f/%x"))));
    }
}
