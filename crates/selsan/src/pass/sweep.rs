use log::info;

use crate::ir::{FuncAttrs, FuncId, InstId, InstTag, Module, Value};
use crate::pta::PointsToOracle;
use crate::stats::Statistics;

use super::UnsafeObjects;

/// Finalizes the tags of interesting instructions: anything that may access
/// an unsafe object stays instrumented, everything else is left alone by the
/// sanitizer.
pub struct FinalSweep<'a, O: ?Sized> {
    module: &'a mut Module,
    oracle: &'a O,
    unsafe_objects: &'a UnsafeObjects,
    stats: &'a mut Statistics,
}

impl<'a, O: PointsToOracle + ?Sized> FinalSweep<'a, O> {
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
        }
    }

    pub fn process(mut self) {
        let func_ids = self
            .module
            .defined_funcs()
            .filter(|&func_id| !self.module.funcs[func_id].is_unsafe_closure())
            .collect::<Vec<_>>();

        let mut swept = 0;
        let mut instrumented = 0;

        for func_id in func_ids {
            let (func_swept, func_instrumented) = self.sweep_func(func_id);
            swept += func_swept;
            instrumented += func_instrumented;
        }

        info!("instrumented instructions: {instrumented} of {swept}");

        self.stats.swept = swept;
        self.stats.instrumented = instrumented;
    }

    fn sweep_func(&mut self, func_id: FuncId) -> (usize, usize) {
        let inst_ids = self
            .module
            .func_insts(func_id)
            .filter(|&inst_id| self.module.insts[inst_id].kind.access_kind().is_interesting())
            .collect::<Vec<_>>();

        let mut instrumented = 0;

        for &inst_id in &inst_ids {
            let hit = self.touches_unsafe(inst_id);
            let inst = &mut self.module.insts[inst_id];

            if hit && !inst.is_unsafe() {
                inst.tag = InstTag::Selective;
            }

            match inst.tag {
                InstTag::UnsafeFull | InstTag::Selective => instrumented += 1,
                InstTag::Untagged | InstTag::NoSanitize => inst.tag = InstTag::NoSanitize,
            }
        }

        if instrumented > 0 {
            self.module.funcs[func_id]
                .attrs
                .insert(FuncAttrs::SANITIZE_ADDRESS);
        }

        (inst_ids.len(), instrumented)
    }

    /// Checks the address of a single-location access, or every operand and
    /// the result of anything else.
    fn touches_unsafe(&mut self, inst_id: InstId) -> bool {
        let inst = &self.module.insts[inst_id];

        let values = match inst.kind.pointer_operand() {
            Some(ptr) => vec![ptr],

            None => inst
                .kind
                .operands()
                .chain(inst.has_result().then_some(Value::Inst(inst_id)))
                .collect(),
        };

        for value in values {
            if !self.oracle.has_record(value) {
                continue;
            }

            self.stats.record_query();

            if self
                .oracle
                .points_to(value)
                .intersects(self.unsafe_objects.objects())
            {
                return true;
            }
        }

        false
    }
}
