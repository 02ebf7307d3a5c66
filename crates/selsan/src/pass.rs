//! The selective instrumentation pass.
//!
//! In the default mode the pass runs three stages over a module:
//!
//! 1. [`Collector`] seeds the unsafe-object set from `UnsafeFull` instructions.
//! 2. [`Classifier`] tags every instruction by whether it may touch an unsafe
//!    object and marks the functions that need instrumentation.
//! 3. [`FinalSweep`] settles the tags of the instructions the sanitizer
//!    actually instruments.

mod classify;
mod collect;
mod sweep;

use std::fmt::{self, Display};
use std::time::Instant;

use hashbrown::HashSet;
use log::{debug, info};
use strum::{Display as StrumDisplay, EnumString};

use crate::ir::{FuncAttrs, InstTag, Module, Value};
use crate::pta::{Analysis, AnalysisError, PointsToOracle, Strategy};
use crate::stats::Statistics;
use crate::util::format_ratio;

pub use self::classify::{Classifier, FalseSafe};
pub use self::collect::{Collector, UnsafeObjects};
pub use self::sweep::FinalSweep;

#[derive(StrumDisplay, EnumString, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    /// Instrument what may touch memory reachable from unsafe code.
    #[default]
    Selective,

    /// Instrument every function in full.
    Baseline,

    /// Instrument the unsafe-marked instructions only.
    Naive,
}

#[derive(Debug, Default, Clone)]
pub struct PassOptions {
    pub strategy: Strategy,
    pub mode: Mode,
}

/// What the selective mode found out about the module.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub unsafe_objects: UnsafeObjects,
    pub false_safe: FalseSafe,
}

/// The selective mode's result together with the analysis it queried.
pub struct SelectiveRun {
    pub analysis: Analysis,
    pub selection: Selection,
}

/// Runs the pass in the configured mode.
///
/// Only the selective mode builds a points-to analysis, and only its
/// construction can fail.
pub fn run(
    module: &mut Module,
    options: &PassOptions,
    stats: &mut Statistics,
) -> Result<Option<SelectiveRun>, AnalysisError> {
    match options.mode {
        Mode::Baseline => {
            instrument_all(module);

            Ok(None)
        }

        Mode::Naive => {
            instrument_unsafe(module);

            Ok(None)
        }

        Mode::Selective => {
            let start = Instant::now();
            let analysis = Analysis::build(module, options.strategy)?;
            stats.pta_time = start.elapsed();

            let selection = select(module, &analysis, stats);

            Ok(Some(SelectiveRun {
                analysis,
                selection,
            }))
        }
    }
}

/// Runs the three stages against an already constructed oracle.
pub fn select<O: PointsToOracle + ?Sized>(
    module: &mut Module,
    oracle: &O,
    stats: &mut Statistics,
) -> Selection {
    let start = Instant::now();
    stats.total_objects = count_referenced_objects(module, oracle);

    let unsafe_objects = Collector::new(module, oracle, stats).process();
    stats.unsafe_objects = unsafe_objects.values().len();

    let false_safe = Classifier::new(module, oracle, &unsafe_objects, stats).process();
    FinalSweep::new(module, oracle, &unsafe_objects, stats).process();

    for inst_id in module.all_insts() {
        let inst = &module.insts[inst_id];

        if inst.tag.is_instrumented() {
            stats.selective.add(inst);
        }
    }

    stats.traverse_time = start.elapsed();
    info!(
        "selection done: {} unsafe objects, {} false-safe objects",
        stats.unsafe_objects, stats.false_safe_objects
    );

    Selection {
        unsafe_objects,
        false_safe,
    }
}

/// Counts the distinct concrete objects any instruction refers to.
fn count_referenced_objects<O: PointsToOracle + ?Sized>(module: &Module, oracle: &O) -> usize {
    let mut objects = HashSet::<Value>::new();

    for inst_id in module.all_insts() {
        let inst = &module.insts[inst_id];
        let values = inst
            .kind
            .operands()
            .chain(inst.has_result().then_some(Value::Inst(inst_id)));

        for value in values {
            if !oracle.has_record(value) {
                break;
            }

            objects.extend(
                oracle
                    .points_to(value)
                    .iter()
                    .filter_map(|obj| oracle.resolve_object(obj)),
            );
        }
    }

    objects.len()
}

/// Marks every defined function for full instrumentation. Tags are left as is.
pub fn instrument_all(module: &mut Module) {
    for func in module.funcs.values_mut() {
        if !func.is_declaration() {
            func.attrs.insert(FuncAttrs::SANITIZE_ADDRESS);
        }
    }

    debug!("baseline: every function is instrumented");
}

/// Exempts every instruction but the unsafe-marked ones from instrumentation.
pub fn instrument_unsafe(module: &mut Module) {
    let func_ids = module.defined_funcs().collect::<Vec<_>>();

    for func_id in func_ids {
        let inst_ids = module.func_insts(func_id).collect::<Vec<_>>();
        let mut has_unsafe = false;

        for inst_id in inst_ids {
            let inst = &mut module.insts[inst_id];

            if inst.is_unsafe() {
                has_unsafe = true;
            } else {
                inst.tag = InstTag::NoSanitize;
            }
        }

        if has_unsafe {
            module.funcs[func_id].attrs.insert(FuncAttrs::SANITIZE_ADDRESS);
        }
    }
}

/// How much of a module is marked unsafe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnsafeCounts {
    pub insts: usize,
    pub unsafe_insts: usize,
    pub memory_insts: usize,
    pub unsafe_memory_insts: usize,
}

pub fn count_unsafe(module: &Module) -> UnsafeCounts {
    let mut counts = UnsafeCounts::default();

    for inst_id in module.all_insts() {
        let inst = &module.insts[inst_id];
        let is_memory = inst.kind.access_kind().is_memory_access();

        counts.insts += 1;
        counts.memory_insts += is_memory as usize;

        if inst.is_unsafe() {
            counts.unsafe_insts += 1;
            counts.unsafe_memory_insts += is_memory as usize;
        }
    }

    counts
}

impl Display for UnsafeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "unsafe instructions:        {} ({})",
            self.unsafe_insts,
            format_ratio(self.unsafe_insts, self.insts)
        )?;
        writeln!(
            f,
            "unsafe memory instructions: {} ({})",
            self.unsafe_memory_insts,
            format_ratio(self.unsafe_memory_insts, self.memory_insts)
        )
    }
}
