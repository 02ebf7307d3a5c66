use log::{debug, trace};

use crate::ir::{FuncAttrs, FuncId, InstId, InstTag, Module, Value};
use crate::pta::{ObjectId, PointsTo, PointsToOracle};
use crate::stats::Statistics;

use super::UnsafeObjects;

/// Objects sharing a points-to set with an unsafe object without being
/// unsafe themselves. Diagnostic only.
#[derive(Debug, Clone, Default)]
pub struct FalseSafe(PointsTo);

impl FalseSafe {
    pub fn objects(&self) -> &PointsTo {
        &self.0
    }

    pub fn contains(&self, obj: ObjectId) -> bool {
        self.0.contains(obj)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Tags every instruction outside unsafe closures as either `Selective` or
/// `NoSanitize` depending on whether it may touch an unsafe object.
pub struct Classifier<'a, O: ?Sized> {
    module: &'a mut Module,
    oracle: &'a O,
    unsafe_objects: &'a UnsafeObjects,
    stats: &'a mut Statistics,
    false_safe: PointsTo,
}

impl<'a, O: PointsToOracle + ?Sized> Classifier<'a, O> {
    pub fn new(
        module: &'a mut Module,
        oracle: &'a O,
        unsafe_objects: &'a UnsafeObjects,
        stats: &'a mut Statistics,
    ) -> Self {
        Self {
            module,
            oracle,
            unsafe_objects,
            stats,
            false_safe: Default::default(),
        }
    }

    pub fn process(mut self) -> FalseSafe {
        let func_ids = self.module.defined_funcs().collect::<Vec<_>>();

        for func_id in func_ids {
            self.classify_func(func_id);
        }

        self.stats.false_safe_objects = self.false_safe.len();

        FalseSafe(self.false_safe)
    }

    fn classify_func(&mut self, func_id: FuncId) {
        let inst_ids = self.module.func_insts(func_id).collect::<Vec<_>>();

        for &inst_id in &inst_ids {
            self.stats.total.add(&self.module.insts[inst_id]);
        }

        let func = &mut self.module.funcs[func_id];

        // untagged instructions are instrumented in full
        if func.is_unsafe_closure() {
            debug!("leaving the unsafe closure @{} as is", func.name);
            func.attrs.insert(FuncAttrs::SANITIZE_ADDRESS);

            return;
        }

        let mut requires_instrumentation = false;

        for inst_id in inst_ids {
            requires_instrumentation |= self.classify_inst(inst_id);
        }

        if requires_instrumentation {
            let func = &mut self.module.funcs[func_id];
            trace!("@{} requires instrumentation", func.name);
            func.attrs.insert(FuncAttrs::SANITIZE_ADDRESS);
        }
    }

    /// Tags a single instruction, returning whether its function must be
    /// instrumented on its account.
    fn classify_inst(&mut self, inst_id: InstId) -> bool {
        let inst = &self.module.insts[inst_id];
        let values = inst
            .kind
            .operands()
            .chain(inst.has_result().then_some(Value::Inst(inst_id)))
            .collect::<Vec<_>>();

        for value in values {
            // nothing past a value without a record is considered
            if !self.oracle.has_record(value) {
                break;
            }

            if self.touches_unsafe(value) {
                let inst = &mut self.module.insts[inst_id];

                if !inst.is_unsafe() {
                    inst.tag = InstTag::Selective;
                }

                return true;
            }
        }

        let inst = &mut self.module.insts[inst_id];

        match inst.tag {
            InstTag::UnsafeFull => true,
            InstTag::Selective => false,

            InstTag::Untagged | InstTag::NoSanitize => {
                inst.tag = InstTag::NoSanitize;

                false
            }
        }
    }

    fn touches_unsafe(&mut self, value: Value) -> bool {
        self.stats.record_query();
        let pts = self.oracle.points_to(value);

        if !pts.intersects(self.unsafe_objects.objects()) {
            return false;
        }

        for obj in pts.iter() {
            if !self.unsafe_objects.contains(obj) {
                self.false_safe.insert(obj);
            }
        }

        true
    }
}
