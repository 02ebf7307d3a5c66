//! Value-flow graph: where a definition may flow to.
//!
//! Used for introspection only; the instrumentation pass never consults it.

use std::collections::VecDeque;
use std::thread;

use bitvec::vec::BitVec;
use hashbrown::HashMap;
use log::debug;

use crate::ir::{FuncId, InstId, InstKind, Module, Value};

use super::{ObjectId, PointsToOracle};

#[derive(Debug, Clone, Default)]
pub struct ValueFlowGraph {
    values: Vec<Value>,
    indices: HashMap<Value, usize>,
    succs: Vec<Vec<usize>>,
    edge_count: usize,
}

impl ValueFlowGraph {
    /// Builds the graph with edges for:
    ///
    /// - def-use: an operand flows into the result of the instruction using it;
    /// - memory: a stored value flows into every load whose address may alias
    ///   the store's;
    /// - calls: arguments flow into parameters and returned values into call
    ///   results, for every callee the oracle resolves.
    pub fn build(module: &Module, oracle: &dyn PointsToOracle) -> Self {
        let mut graph = Self::default();
        let mut stores = vec![];
        let mut loads = vec![];

        for inst_id in module.all_insts() {
            let inst = &module.insts[inst_id];
            let result = Value::Inst(inst_id);

            match inst.kind {
                InstKind::Store { value, ptr } => stores.push((value, oracle.points_to(ptr))),

                InstKind::AtomicRmw { ptr, value, .. } | InstKind::CmpXchg { ptr, new: value, .. } => {
                    stores.push((value, oracle.points_to(ptr)));
                    loads.push((result, oracle.points_to(ptr)));
                    graph.add_operand_edges(module, inst_id);
                }

                InstKind::Load { ptr } => {
                    loads.push((result, oracle.points_to(ptr)));
                    graph.add_operand_edges(module, inst_id);
                }

                InstKind::Call { callee, ref args } => {
                    for func_id in Self::callees(module, oracle, callee) {
                        let func = &module.funcs[func_id];

                        for (&arg, &param_id) in args.iter().zip(&func.params) {
                            graph.add_edge(arg, Value::Param(param_id));
                        }

                        if inst.has_result() {
                            for ret_id in module.func_insts(func_id) {
                                if let InstKind::Ret { value: Some(value) } = module.insts[ret_id].kind {
                                    graph.add_edge(value, result);
                                }
                            }
                        }
                    }
                }

                _ => graph.add_operand_edges(module, inst_id),
            }
        }

        for (value, store_pts) in &stores {
            for (load, load_pts) in &loads {
                if store_pts.intersects(load_pts) {
                    graph.add_edge(*value, *load);
                }
            }
        }

        debug!(
            "built the value-flow graph: {} nodes, {} edges",
            graph.values.len(),
            graph.edge_count
        );

        graph
    }

    fn callees(
        module: &Module,
        oracle: &dyn PointsToOracle,
        callee: Value,
    ) -> Vec<FuncId> {
        if let Value::Func(func_id) = callee {
            return vec![func_id];
        }

        oracle
            .points_to(callee)
            .iter()
            .filter_map(|obj: ObjectId| match oracle.resolve_object(obj)? {
                Value::Func(func_id) if !module.funcs[func_id].is_declaration() => Some(func_id),
                _ => None,
            })
            .collect()
    }

    fn add_operand_edges(&mut self, module: &Module, inst_id: InstId) {
        let inst = &module.insts[inst_id];

        if !inst.has_result() {
            return;
        }

        for operand in inst.kind.operands() {
            self.add_edge(operand, Value::Inst(inst_id));
        }
    }

    fn node(&mut self, value: Value) -> usize {
        if let Some(&idx) = self.indices.get(&value) {
            return idx;
        }

        let idx = self.values.len();
        self.values.push(value);
        self.succs.push(vec![]);
        self.indices.insert(value, idx);

        idx
    }

    fn add_edge(&mut self, from: Value, to: Value) {
        if matches!(from, Value::Int(_) | Value::Null) {
            return;
        }

        let from = self.node(from);
        let to = self.node(to);

        if !self.succs[from].contains(&to) {
            self.succs[from].push(to);
            self.edge_count += 1;
        }
    }

    pub fn node_count(&self) -> usize {
        self.values.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Returns every value reachable from `start` in breadth-first order.
    ///
    /// `start` itself is only included if it lies on a cycle.
    pub fn traverse(&self, start: Value) -> Vec<Value> {
        let Some(&start) = self.indices.get(&start) else {
            return vec![];
        };

        let mut visited = BitVec::<usize>::repeat(false, self.values.len());
        let mut queue = VecDeque::from([start]);
        let mut result = vec![];

        while let Some(idx) = queue.pop_front() {
            for &succ in &self.succs[idx] {
                if !visited[succ] {
                    visited.set(succ, true);
                    result.push(self.values[succ]);
                    queue.push_back(succ);
                }
            }
        }

        result
    }

    /// Runs a traversal per start value, each on its own thread.
    pub fn traverse_all(&self, starts: &[Value]) -> Vec<Vec<Value>> {
        thread::scope(|s| {
            let handles = starts
                .iter()
                .map(|&start| s.spawn(move || self.traverse(start)))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }
}
