use log::{debug, info, trace};

use crate::ir::{FuncAttrs, InstId, InstTag, Module, Value};
use crate::pta::{ObjectId, PointsTo, PointsToOracle};
use crate::stats::Statistics;

/// Objects reachable from unsafe-marked instructions.
///
/// Alias queries use the abstract set; the concrete values are what the
/// abstract objects resolve to.
#[derive(Debug, Clone, Default)]
pub struct UnsafeObjects {
    objects: PointsTo,
    values: Vec<Value>,
}

impl UnsafeObjects {
    pub fn objects(&self) -> &PointsTo {
        &self.objects
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn contains(&self, obj: ObjectId) -> bool {
        self.objects.contains(obj)
    }

    pub fn contains_value(&self, value: Value) -> bool {
        self.values.binary_search(&value).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Seeds the unsafe-object set from instructions tagged `UnsafeFull`.
pub struct Collector<'a, O: ?Sized> {
    module: &'a mut Module,
    oracle: &'a O,
    stats: &'a mut Statistics,
    objects: PointsTo,
}

impl<'a, O: PointsToOracle + ?Sized> Collector<'a, O> {
    pub fn new(module: &'a mut Module, oracle: &'a O, stats: &'a mut Statistics) -> Self {
        Self {
            module,
            oracle,
            stats,
            objects: Default::default(),
        }
    }

    pub fn process(mut self) -> UnsafeObjects {
        let module = &*self.module;
        let unsafe_insts = module
            .defined_funcs()
            .flat_map(|func_id| module.func_insts(func_id))
            .filter(|&inst_id| module.insts[inst_id].is_unsafe())
            .collect::<Vec<_>>();

        for inst_id in unsafe_insts {
            self.stats.unsafe_marked.add(&self.module.insts[inst_id]);
            self.collect_inst(inst_id);
        }

        let unsafe_objects = self.resolve();
        info!(
            "unsafe objects: {} abstract, {} concrete",
            unsafe_objects.objects.len(),
            unsafe_objects.values.len()
        );

        self.mark_values(&unsafe_objects);

        unsafe_objects
    }

    /// The values of an unsafe instruction whose targets become unsafe: its
    /// pointer operands except a directly called function, then its result.
    fn seed_values(&self, inst_id: InstId) -> Vec<Value> {
        let inst = &self.module.insts[inst_id];
        let callee_idx = inst.kind.callee_index();

        inst.kind
            .operands()
            .enumerate()
            .filter(|&(idx, operand)| {
                let direct_callee = Some(idx) == callee_idx && matches!(operand, Value::Func(_));

                !direct_callee && self.module.is_pointer(operand)
            })
            .map(|(_, operand)| operand)
            .chain(inst.has_result().then_some(Value::Inst(inst_id)))
            .collect()
    }

    fn collect_inst(&mut self, inst_id: InstId) {
        let values = self.seed_values(inst_id);
        let mut queried = false;

        for value in values {
            if !self.oracle.has_record(value) {
                continue;
            }

            self.stats.record_query();
            queried = true;
            self.objects.union_with(&self.oracle.points_to(value));
        }

        if !queried {
            debug!(
                "`{}` marks nothing unsafe: no pointer operands",
                self.module.display_inst(inst_id)
            );
        }
    }

    fn resolve(&self) -> UnsafeObjects {
        let mut values = self
            .objects
            .iter()
            .filter_map(|obj| self.oracle.resolve_object(obj))
            .collect::<Vec<_>>();
        values.sort();
        values.dedup();

        UnsafeObjects {
            objects: self.objects.clone(),
            values,
        }
    }

    /// Tags unsafe allocation sites for full instrumentation and flags unsafe
    /// closures.
    fn mark_values(&mut self, unsafe_objects: &UnsafeObjects) {
        for &value in &unsafe_objects.values {
            trace!("unsafe object {}", self.module.display_value(value));

            match value {
                Value::Inst(inst_id) => self.module.insts[inst_id].tag = InstTag::UnsafeFull,

                Value::Func(func_id) => {
                    let func = &mut self.module.funcs[func_id];

                    if func.attrs.contains(FuncAttrs::CLOSURE) {
                        debug!("@{} is an unsafe closure", func.name);
                        func.attrs.insert(FuncAttrs::UNSAFE_CLOSURE);
                    }
                }

                _ => {}
            }
        }
    }
}
