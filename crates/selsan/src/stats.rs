use std::fmt::{self, Display};
use std::time::Duration;

use hashbrown::HashMap;

use crate::ir::{Inst, Opcode};
use crate::util::format_ratio;

/// Instruction counts per opcode.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstCounts {
    total: usize,
    by_opcode: HashMap<Opcode, usize>,
}

impl InstCounts {
    pub fn add(&mut self, inst: &Inst) {
        self.total += 1;
        *self.by_opcode.entry(inst.kind.opcode()).or_default() += 1;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn get(&self, opcode: Opcode) -> usize {
        self.by_opcode.get(&opcode).copied().unwrap_or(0)
    }

    /// Loads, stores and atomics. Memory transfers are counted separately.
    pub fn memory(&self) -> usize {
        [Opcode::Load, Opcode::Store, Opcode::CmpXchg, Opcode::AtomicRmw]
            .into_iter()
            .map(|opcode| self.get(opcode))
            .sum()
    }

    fn fmt_breakdown(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  load instructions:           {}", self.get(Opcode::Load))?;
        writeln!(f, "  store instructions:          {}", self.get(Opcode::Store))?;
        writeln!(f, "  cmpxchg instructions:        {}", self.get(Opcode::CmpXchg))?;
        writeln!(f, "  atomicrmw instructions:      {}", self.get(Opcode::AtomicRmw))?;
        writeln!(f, "  memory transfer intrinsics:  {}", self.get(Opcode::MemTransfer))
    }
}

/// Counters and timings collected over one pass invocation.
///
/// Nothing here feeds back into instrumentation decisions.
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    pub total: InstCounts,
    pub unsafe_marked: InstCounts,
    pub selective: InstCounts,

    pub pointer_queries: usize,
    pub total_objects: usize,
    pub unsafe_objects: usize,
    pub false_safe_objects: usize,

    /// Interesting instructions seen by the final sweep, and how many of them
    /// stay instrumented.
    pub swept: usize,
    pub instrumented: usize,

    pub pta_time: Duration,
    pub traverse_time: Duration,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&mut self) {
        self.pointer_queries += 1;
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let memory = self.total.memory();

        writeln!(f, "##### instruction statistics #####")?;
        writeln!(f, "total instructions:            {}", self.total.total())?;
        writeln!(f)?;

        writeln!(f, "total memory instructions:     {memory}")?;
        self.total.fmt_breakdown(f)?;
        writeln!(f)?;

        writeln!(
            f,
            "unsafe memory instructions:    {} ({})",
            self.unsafe_marked.memory(),
            format_ratio(self.unsafe_marked.memory(), memory)
        )?;
        self.unsafe_marked.fmt_breakdown(f)?;
        writeln!(f)?;

        writeln!(
            f,
            "selective memory instructions: {} ({})",
            self.selective.memory(),
            format_ratio(self.selective.memory(), memory)
        )?;
        self.selective.fmt_breakdown(f)?;
        writeln!(f)?;

        writeln!(f, "pointer queries:               {}", self.pointer_queries)?;
        writeln!(f, "total objects:                 {}", self.total_objects)?;
        writeln!(
            f,
            "unsafe objects:                {} ({})",
            self.unsafe_objects,
            format_ratio(self.unsafe_objects, self.total_objects)
        )?;
        writeln!(f, "false-safe objects:            {}", self.false_safe_objects)?;
        writeln!(
            f,
            "instrumented instructions:     {} of {} ({})",
            self.instrumented,
            self.swept,
            format_ratio(self.instrumented, self.swept)
        )?;
        writeln!(f)?;

        writeln!(f, "pta time:                      {:.3?}", self.pta_time)?;
        writeln!(f, "traverse time:                 {:.3?}", self.traverse_time)
    }
}
