//! Whole-program points-to analysis.
//!
//! The instrumentation pass only sees a [`PointsToOracle`]. The bundled
//! analyses are field-, flow- and context-insensitive and solve the
//! constraints of a [`Pag`] built from the module.

mod andersen;
mod demand;
mod pag;
mod steensgaard;
pub mod vfg;

use std::borrow::Cow;
use std::fmt::{self, Debug, Display};

use bitvec::vec::BitVec;
use log::{debug, info};
use strum::{Display as StrumDisplay, EnumString};
use thiserror::Error;

use crate::ir::{Module, Value};

pub use self::andersen::Andersen;
pub use self::demand::DemandDriven;
pub use self::pag::{CallSite, FuncSig, NodeId, NodeKind, ObjectKind, Pag};
pub use self::steensgaard::Steensgaard;
pub use self::vfg::ValueFlowGraph;

/// An abstract memory object: a may-point-to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub fn from_index(idx: usize) -> Self {
        Self(idx as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// A set of abstract objects.
#[derive(Clone, Default)]
pub struct PointsTo(BitVec);

impl PointsTo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.not_any()
    }

    pub fn len(&self) -> usize {
        self.0.count_ones()
    }

    pub fn contains(&self, obj: ObjectId) -> bool {
        self.0.get(obj.index()).is_some_and(|bit| *bit)
    }

    /// Adds an object to the set, returning whether it was absent.
    pub fn insert(&mut self, obj: ObjectId) -> bool {
        if self.contains(obj) {
            return false;
        }

        if self.0.len() <= obj.index() {
            self.0.resize(obj.index() + 1, false);
        }

        self.0.set(obj.index(), true);

        true
    }

    /// Adds every object of `other` to the set, returning whether the set grew.
    pub fn union_with(&mut self, other: &PointsTo) -> bool {
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), false);
        }

        let mut changed = false;

        for idx in other.0.iter_ones() {
            if !self.0[idx] {
                self.0.set(idx, true);
                changed = true;
            }
        }

        changed
    }

    pub fn intersects(&self, other: &PointsTo) -> bool {
        self.iter().any(|obj| other.contains(obj))
    }

    pub fn is_subset(&self, other: &PointsTo) -> bool {
        self.iter().all(|obj| other.contains(obj))
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.0.iter_ones().map(ObjectId::from_index)
    }
}

impl PartialEq for PointsTo {
    fn eq(&self, other: &Self) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }
}

impl Eq for PointsTo {}

impl Debug for PointsTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Display for PointsTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;

        for (idx, obj) in self.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }

            write!(f, "{obj}")?;
        }

        write!(f, "}}")
    }
}

impl FromIterator<ObjectId> for PointsTo {
    fn from_iter<I: IntoIterator<Item = ObjectId>>(iter: I) -> Self {
        let mut result = Self::new();

        for obj in iter {
            result.insert(obj);
        }

        result
    }
}

/// What the instrumentation pass asks of a pointer analysis.
///
/// Queries are only meaningful for values that have a record; asking for the
/// points-to set of any other value yields an empty set.
pub trait PointsToOracle {
    fn has_record(&self, value: Value) -> bool;

    fn points_to(&self, value: Value) -> Cow<'_, PointsTo>;

    /// Maps an abstract object back to the program value that created it.
    /// Structural objects have no such value.
    fn resolve_object(&self, obj: ObjectId) -> Option<Value>;

    fn object_count(&self) -> usize;
}

#[derive(StrumDisplay, EnumString, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "kebab-case")]
pub enum Strategy {
    /// Subset-based (inclusion) analysis.
    #[default]
    Andersen,

    /// Unification-based analysis: faster, less precise.
    Steensgaard,

    /// Subset-based analysis solved lazily for the queried values only.
    DemandDriven,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("`{inst}` in @{func} accesses memory through a non-pointer value")]
    NonPointerAddress { func: String, inst: String },

    #[error("`{inst}` in @{func} passes {actual} arguments to @{callee}, which takes {expected}")]
    CallArity {
        func: String,
        inst: String,
        callee: String,
        expected: usize,
        actual: usize,
    },

    #[error("`{inst}` in @{func} calls a non-pointer value")]
    NonPointerCallee { func: String, inst: String },
}

/// A constructed oracle of the selected strategy.
pub enum Analysis {
    Andersen(Andersen),
    Steensgaard(Steensgaard),
    DemandDriven(DemandDriven),
}

impl Analysis {
    pub fn build(module: &Module, strategy: Strategy) -> Result<Self, AnalysisError> {
        let pag = Pag::build(module)?;

        info!(
            "built the assignment graph: {} nodes, {} objects",
            pag.node_count(),
            pag.object_count()
        );
        debug!("solving with the {strategy} strategy");

        Ok(match strategy {
            Strategy::Andersen => Self::Andersen(Andersen::new(pag)),
            Strategy::Steensgaard => Self::Steensgaard(Steensgaard::new(pag)),
            Strategy::DemandDriven => Self::DemandDriven(DemandDriven::new(pag)),
        })
    }

    pub fn pag(&self) -> &Pag {
        match self {
            Self::Andersen(pta) => pta.pag(),
            Self::Steensgaard(pta) => pta.pag(),
            Self::DemandDriven(pta) => pta.pag(),
        }
    }

    fn oracle(&self) -> &dyn PointsToOracle {
        match self {
            Self::Andersen(pta) => pta,
            Self::Steensgaard(pta) => pta,
            Self::DemandDriven(pta) => pta,
        }
    }
}

impl PointsToOracle for Analysis {
    fn has_record(&self, value: Value) -> bool {
        self.oracle().has_record(value)
    }

    fn points_to(&self, value: Value) -> Cow<'_, PointsTo> {
        self.oracle().points_to(value)
    }

    fn resolve_object(&self, obj: ObjectId) -> Option<Value> {
        self.oracle().resolve_object(obj)
    }

    fn object_count(&self) -> usize {
        self.oracle().object_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn obj(idx: usize) -> ObjectId {
        ObjectId::from_index(idx)
    }

    #[test]
    fn test_points_to_set_ops() {
        let mut lhs = [obj(1), obj(5)].into_iter().collect::<PointsTo>();
        let rhs = [obj(5), obj(70)].into_iter().collect::<PointsTo>();

        assert!(lhs.intersects(&rhs));
        assert!(lhs.union_with(&rhs));
        assert!(!lhs.union_with(&rhs));
        assert_eq!(lhs.iter().collect::<Vec<_>>(), vec![obj(1), obj(5), obj(70)]);
        assert_eq!(lhs.len(), 3);
        assert!(!lhs.insert(obj(70)));
        assert_eq!(lhs.to_string(), "{o1, o5, o70}");
    }

    #[test]
    fn test_points_to_equality_ignores_capacity() {
        let mut lhs = PointsTo::new();
        lhs.insert(obj(100));
        let mut rhs = PointsTo::new();
        rhs.insert(obj(2));

        assert_ne!(lhs, rhs);
        assert_eq!(PointsTo::new(), PointsTo::from_iter([]));

        let mut wide = PointsTo::new();
        wide.insert(obj(64));
        let mut narrow = wide.clone();
        narrow.union_with(&PointsTo::new());
        assert_eq!(wide, narrow);
        assert!(PointsTo::new().is_empty());
    }

    const PROGRAM: &str = "
        global @slot: ptr
        declare @malloc(i64) -> ptr #allocator
        declare @opaque() -> ptr

        define @id(ptr %x) -> ptr {
        entry:
          ret %x
        }

        define @main() {
        entry:
          %a = alloca i64
          %b = alloca i64
          %h = call @malloc(8)
          %pa = call @id(%a)
          %pb = call @id(%b)
          store %h, @slot
          %l = load ptr, @slot
          %c = alloca ptr
          call @llvm.memcpy(%c, @slot, 8)
          %m = load ptr, %c
          %u = call @opaque()
          %fp = alloca ptr
          store @id, %fp
          %f = load ptr, %fp
          %r = call ptr %f(%b)
          %i = ptrtoint %a to i64
          ret void
        }
    ";

    fn pts_of(analysis: &Analysis, module: &Module, path: &str) -> Vec<Value> {
        let value = module.find_value(path).unwrap();

        analysis
            .points_to(value)
            .iter()
            .filter_map(|obj| analysis.resolve_object(obj))
            .collect()
    }

    #[test]
    fn test_andersen_points_to() {
        let module = parse(PROGRAM).unwrap();
        let analysis = Analysis::build(&module, Strategy::Andersen).unwrap();
        let v = |path| module.find_value(path).unwrap();

        assert_eq!(pts_of(&analysis, &module, "main/%a"), vec![v("main/%a")]);
        assert_eq!(pts_of(&analysis, &module, "main/%h"), vec![v("main/%h")]);
        assert_eq!(pts_of(&analysis, &module, "main/%l"), vec![v("main/%h")]);
        assert_eq!(pts_of(&analysis, &module, "main/%m"), vec![v("main/%h")]);
        assert_eq!(pts_of(&analysis, &module, "main/%f"), vec![v("@id")]);

        // context-insensitive: both calls of @id merge
        let mut pa = pts_of(&analysis, &module, "main/%pa");
        pa.sort();
        let mut expected = vec![v("main/%a"), v("main/%b")];
        expected.sort();
        assert_eq!(pa, expected);

        // the indirect call is resolved on the fly
        assert_eq!(pts_of(&analysis, &module, "main/%r"), expected);

        // opaque pointers go to the structural unknown object
        let u = analysis.points_to(v("main/%u"));
        assert_eq!(u.len(), 1);
        assert_eq!(analysis.resolve_object(u.iter().next().unwrap()), None);

        assert!(analysis.has_record(Value::Null));
        assert!(analysis.points_to(Value::Null).is_empty());
        assert!(!analysis.has_record(v("main/%i")));
        assert!(!analysis.has_record(Value::Int(3)));
    }

    #[test]
    fn test_strategies_agree_or_overapproximate() {
        let module = parse(PROGRAM).unwrap();
        let andersen = Analysis::build(&module, Strategy::Andersen).unwrap();
        let steensgaard = Analysis::build(&module, Strategy::Steensgaard).unwrap();
        let demand = Analysis::build(&module, Strategy::DemandDriven).unwrap();

        let values = module
            .all_insts()
            .map(Value::Inst)
            .chain(module.params.keys().map(Value::Param))
            .chain(module.globals.keys().map(Value::Global))
            .filter(|&value| andersen.has_record(value))
            .collect::<Vec<_>>();
        assert!(!values.is_empty());

        for value in values {
            let precise = andersen.points_to(value);

            assert_eq!(*demand.points_to(value), *precise, "{value:?}");
            assert!(
                precise.is_subset(&steensgaard.points_to(value)),
                "{value:?}"
            );
        }

        // unification merges the two stack objects passed to @id
        let a = module.find_value("main/%a").unwrap();
        assert_eq!(steensgaard.points_to(a).len(), 2);
    }

    #[test]
    fn test_int_round_trip_keeps_pointees() {
        let module = parse(
            "define @f() -> i64 {
             entry:
               %p = alloca i64
               %i = ptrtoint %p to i64
               %q = inttoptr %i to ptr
               %v = load i64, %q
               ret %v
             }",
        )
        .unwrap();
        let p = module.find_value("f/%p").unwrap();
        let q = module.find_value("f/%q").unwrap();

        for strategy in [Strategy::Andersen, Strategy::Steensgaard, Strategy::DemandDriven] {
            let analysis = Analysis::build(&module, strategy).unwrap();
            let q_pts = analysis.points_to(q);

            assert!(analysis.points_to(p).is_subset(&q_pts), "{strategy}");
            assert!(
                q_pts.iter().any(|obj| analysis.resolve_object(obj).is_none()),
                "{strategy}"
            );
        }
    }

    #[test]
    fn test_build_errors() {
        let module = parse(
            "define @f(i64 %x) -> i64 {
             entry:
               %v = load i64, %x
               ret %v
             }",
        )
        .unwrap();
        assert!(matches!(
            Analysis::build(&module, Strategy::Andersen),
            Err(AnalysisError::NonPointerAddress { .. })
        ));

        let module = parse(
            "declare @g(ptr)
             define @f() {
             entry:
               call @g()
               ret void
             }",
        )
        .unwrap();
        assert!(matches!(
            Analysis::build(&module, Strategy::Steensgaard),
            Err(AnalysisError::CallArity {
                expected: 1,
                actual: 0,
                ..
            })
        ));

        let module = parse(
            "define @f(i64 %x) {
             entry:
               call %x()
               ret void
             }",
        )
        .unwrap();
        assert!(matches!(
            Analysis::build(&module, Strategy::DemandDriven),
            Err(AnalysisError::NonPointerCallee { .. })
        ));
    }
}
