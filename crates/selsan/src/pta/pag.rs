use hashbrown::HashMap;
use log::trace;

use crate::ir::{CastOp, FuncAttrs, FuncId, GlobalId, InstId, InstKind, Module, Value};

use super::{AnalysisError, ObjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_index(idx: usize) -> Self {
        Self(idx as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A pointer-typed program value.
    Value(Value),

    /// The pointer returned by a function.
    Return(FuncId),

    /// The pointer stored inside an abstract object.
    Content(ObjectId),

    /// An intermediate for a memory transfer.
    Temp(InstId),

    /// Every pointer converted to an integer. Integer-to-pointer casts may
    /// yield any of them.
    Escaped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Stack(InstId),
    Heap(InstId),
    Global(GlobalId),
    Func(FuncId),

    /// Memory the analysis knows nothing about: pointers produced by
    /// intrinsics, returned by external functions or rebuilt from integers.
    Unknown,
}

impl ObjectKind {
    pub fn value(&self) -> Option<Value> {
        match *self {
            Self::Stack(inst_id) | Self::Heap(inst_id) => Some(Value::Inst(inst_id)),
            Self::Global(global_id) => Some(Value::Global(global_id)),
            Self::Func(func_id) => Some(Value::Func(func_id)),
            Self::Unknown => None,
        }
    }
}

/// The pointer interface of a function, used to connect call sites.
#[derive(Debug, Clone, Default)]
pub struct FuncSig {
    pub params: Vec<Option<NodeId>>,
    pub ret: Option<NodeId>,
    pub external: bool,
}

/// A call whose callee is only known through points-to information.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub inst: InstId,
    pub callee: NodeId,
    pub args: Vec<Option<NodeId>>,
    pub ret: Option<NodeId>,
}

/// The pointer assignment graph: nodes for pointers and the constraints
/// between them.
#[derive(Debug, Clone, Default)]
pub struct Pag {
    nodes: Vec<NodeKind>,
    value_nodes: HashMap<Value, NodeId>,
    objects: Vec<ObjectKind>,
    contents: Vec<NodeId>,
    unknown: Option<ObjectId>,
    escaped: Option<NodeId>,
    funcs: HashMap<FuncId, FuncSig>,

    /// `node ⊇ {obj}`
    pub addrs: Vec<(NodeId, ObjectId)>,

    /// `dst ⊇ src`, as `(src, dst)`
    pub copies: Vec<(NodeId, NodeId)>,

    /// `dst ⊇ *ptr`, as `(ptr, dst)`
    pub loads: Vec<(NodeId, NodeId)>,

    /// `*ptr ⊇ src`, as `(src, ptr)`
    pub stores: Vec<(NodeId, NodeId)>,

    pub call_sites: Vec<CallSite>,
}

impl Pag {
    pub fn build(module: &Module) -> Result<Self, AnalysisError> {
        PagBuilder::new(module).build()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn node(&self, node: NodeId) -> NodeKind {
        self.nodes[node.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, NodeKind)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, &kind)| (NodeId(idx as u32), kind))
    }

    pub fn object(&self, obj: ObjectId) -> ObjectKind {
        self.objects[obj.index()]
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, ObjectKind)> + '_ {
        self.objects
            .iter()
            .enumerate()
            .map(|(idx, &kind)| (ObjectId::from_index(idx), kind))
    }

    /// The node holding what `obj` points to.
    pub fn content(&self, obj: ObjectId) -> NodeId {
        self.contents[obj.index()]
    }

    pub fn unknown(&self) -> ObjectId {
        self.unknown.expect("the unknown object is created with the graph")
    }

    pub fn escaped(&self) -> NodeId {
        self.escaped.expect("the escaped node is created with the graph")
    }

    pub fn value_node(&self, value: Value) -> Option<NodeId> {
        self.value_nodes.get(&value).copied()
    }

    pub fn func_sig(&self, func_id: FuncId) -> Option<&FuncSig> {
        self.funcs.get(&func_id)
    }

    pub fn func_sigs(&self) -> impl Iterator<Item = (FuncId, &FuncSig)> + '_ {
        self.funcs.iter().map(|(&func_id, sig)| (func_id, sig))
    }

    fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(kind);

        node
    }

    fn add_object(&mut self, kind: ObjectKind) -> ObjectId {
        let obj = ObjectId::from_index(self.objects.len());
        self.objects.push(kind);
        let content = self.add_node(NodeKind::Content(obj));
        self.contents.push(content);

        obj
    }
}

struct PagBuilder<'a> {
    module: &'a Module,
    pag: Pag,
    global_objects: HashMap<GlobalId, ObjectId>,
}

impl<'a> PagBuilder<'a> {
    fn new(module: &'a Module) -> Self {
        Self {
            module,
            pag: Default::default(),
            global_objects: Default::default(),
        }
    }

    fn build(mut self) -> Result<Pag, AnalysisError> {
        let module = self.module;
        let unknown = self.pag.add_object(ObjectKind::Unknown);
        self.pag.unknown = Some(unknown);
        self.pag.escaped = Some(self.pag.add_node(NodeKind::Escaped));
        self.add_value_node(Value::Null);

        for global_id in module.globals.keys() {
            let obj = self.pag.add_object(ObjectKind::Global(global_id));
            let node = self.add_value_node(Value::Global(global_id));
            self.pag.addrs.push((node, obj));
            self.global_objects.insert(global_id, obj);
        }

        for (func_id, func) in &module.funcs {
            let obj = self.pag.add_object(ObjectKind::Func(func_id));
            let node = self.add_value_node(Value::Func(func_id));
            self.pag.addrs.push((node, obj));

            let params = func
                .params
                .iter()
                .map(|&param_id| {
                    let value = Value::Param(param_id);

                    module.is_pointer(value).then(|| self.add_value_node(value))
                })
                .collect();

            let ret = (func.ret_ty.is_pointer() && !func.is_declaration())
                .then(|| self.pag.add_node(NodeKind::Return(func_id)));

            self.pag.funcs.insert(
                func_id,
                FuncSig {
                    params,
                    ret,
                    external: func.is_declaration(),
                },
            );
        }

        for inst_id in module.all_insts() {
            if module.insts[inst_id].ty.is_pointer() {
                self.add_value_node(Value::Inst(inst_id));
            }
        }

        // an initializer is what the global's memory holds
        for (global_id, global) in &module.globals {
            if let Some(src) = global.init.and_then(|init| self.node(init)) {
                let content = self.pag.content(self.global_objects[&global_id]);
                self.pag.copies.push((src, content));
            }
        }

        for inst_id in module.all_insts() {
            self.add_inst(inst_id)?;
        }

        trace!(
            "assignment graph: {} addr, {} copy, {} load, {} store constraints, {} indirect call sites",
            self.pag.addrs.len(),
            self.pag.copies.len(),
            self.pag.loads.len(),
            self.pag.stores.len(),
            self.pag.call_sites.len(),
        );

        Ok(self.pag)
    }

    fn add_value_node(&mut self, value: Value) -> NodeId {
        if let Some(node) = self.pag.value_node(value) {
            return node;
        }

        let node = self.pag.add_node(NodeKind::Value(value));
        self.pag.value_nodes.insert(value, node);

        node
    }

    /// The node of a pointer-typed value; `None` for any other value.
    fn node(&self, value: Value) -> Option<NodeId> {
        self.module
            .is_pointer(value)
            .then(|| self.pag.value_node(value))
            .flatten()
    }

    fn error_context(&self, inst_id: InstId) -> (String, String) {
        let inst = &self.module.insts[inst_id];

        (
            self.module.funcs[inst.func].name.clone(),
            self.module.display_inst(inst_id).to_string(),
        )
    }

    fn address(&self, inst_id: InstId, ptr: Value) -> Result<NodeId, AnalysisError> {
        self.node(ptr).ok_or_else(|| {
            let (func, inst) = self.error_context(inst_id);

            AnalysisError::NonPointerAddress { func, inst }
        })
    }

    fn add_unknown(&mut self, node: NodeId) {
        let unknown = self.pag.unknown();
        self.pag.addrs.push((node, unknown));
    }

    fn add_inst(&mut self, inst_id: InstId) -> Result<(), AnalysisError> {
        let module = self.module;
        let inst = &module.insts[inst_id];
        let result = self.node(Value::Inst(inst_id));

        match inst.kind {
            InstKind::Alloca { .. } => {
                if let Some(result) = result {
                    let obj = self.pag.add_object(ObjectKind::Stack(inst_id));
                    self.pag.addrs.push((result, obj));
                }
            }

            InstKind::Load { ptr } => {
                let ptr = self.address(inst_id, ptr)?;

                if let Some(result) = result {
                    self.pag.loads.push((ptr, result));
                }
            }

            InstKind::Store { value, ptr } => {
                let ptr = self.address(inst_id, ptr)?;

                if let Some(src) = self.node(value) {
                    self.pag.stores.push((src, ptr));
                }
            }

            InstKind::AtomicRmw { ptr, value, .. } | InstKind::CmpXchg { ptr, new: value, .. } => {
                let ptr = self.address(inst_id, ptr)?;

                if let Some(src) = self.node(value) {
                    self.pag.stores.push((src, ptr));
                }

                if let Some(result) = result {
                    self.pag.loads.push((ptr, result));
                }
            }

            InstKind::Gep { base, .. } => {
                let base = self.address(inst_id, base)?;

                if let Some(result) = result {
                    self.pag.copies.push((base, result));
                }
            }

            InstKind::Cast { op, value } => match (op, self.node(value), result) {
                (CastOp::PtrToInt, Some(src), _) => {
                    let escaped = self.pag.escaped();
                    self.pag.copies.push((src, escaped));
                }

                (CastOp::IntToPtr, _, Some(result)) => {
                    let escaped = self.pag.escaped();
                    self.pag.copies.push((escaped, result));
                    self.add_unknown(result);
                }

                (_, Some(src), Some(result)) => self.pag.copies.push((src, result)),
                (_, None, Some(result)) => self.add_unknown(result),
                (_, _, None) => {}
            },

            InstKind::Phi { ref incoming } => {
                if let Some(result) = result {
                    for &(value, _) in incoming {
                        if let Some(src) = self.node(value) {
                            self.pag.copies.push((src, result));
                        }
                    }
                }
            }

            InstKind::Select {
                then_value,
                else_value,
                ..
            } => {
                if let Some(result) = result {
                    for value in [then_value, else_value] {
                        if let Some(src) = self.node(value) {
                            self.pag.copies.push((src, result));
                        }
                    }
                }
            }

            InstKind::Call { callee, ref args } => self.add_call(inst_id, callee, args, result)?,

            InstKind::MemTransfer { dst, src, .. } => {
                let dst = self.address(inst_id, dst)?;
                let src = self.address(inst_id, src)?;
                let temp = self.pag.add_node(NodeKind::Temp(inst_id));
                self.pag.loads.push((src, temp));
                self.pag.stores.push((temp, dst));
            }

            InstKind::MemSet { dst, .. } => {
                self.address(inst_id, dst)?;
            }

            InstKind::Intrinsic { .. } => {
                if let Some(result) = result {
                    self.add_unknown(result);
                }
            }

            InstKind::Ret { value: Some(value) } => {
                let ret = self.pag.funcs[&inst.func].ret;

                if let (Some(src), Some(ret)) = (self.node(value), ret) {
                    self.pag.copies.push((src, ret));
                }
            }

            InstKind::Binary { .. }
            | InstKind::Cmp { .. }
            | InstKind::Ret { value: None }
            | InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Unreachable => {}
        }

        Ok(())
    }

    fn add_call(
        &mut self,
        inst_id: InstId,
        callee: Value,
        args: &[Value],
        result: Option<NodeId>,
    ) -> Result<(), AnalysisError> {
        let Some(callee_node) = self.node(callee) else {
            let (func, inst) = self.error_context(inst_id);

            return Err(AnalysisError::NonPointerCallee { func, inst });
        };

        let arg_nodes = args.iter().map(|&arg| self.node(arg)).collect::<Vec<_>>();

        let Value::Func(func_id) = callee else {
            self.pag.call_sites.push(CallSite {
                inst: inst_id,
                callee: callee_node,
                args: arg_nodes,
                ret: result,
            });

            return Ok(());
        };

        let module = self.module;
        let func = &module.funcs[func_id];

        if func.params.len() != args.len() {
            let (caller, inst) = self.error_context(inst_id);

            return Err(AnalysisError::CallArity {
                func: caller,
                inst,
                callee: func.name.clone(),
                expected: func.params.len(),
                actual: args.len(),
            });
        }

        if func.is_declaration() {
            if let Some(result) = result {
                if func.attrs.contains(FuncAttrs::ALLOCATOR) {
                    let obj = self.pag.add_object(ObjectKind::Heap(inst_id));
                    self.pag.addrs.push((result, obj));
                } else {
                    self.add_unknown(result);
                }
            }

            return Ok(());
        }

        let sig = &self.pag.funcs[&func_id];

        let mut copies = sig
            .params
            .iter()
            .zip(&arg_nodes)
            .filter_map(|(&param, &arg)| Some((arg?, param?)))
            .collect::<Vec<_>>();

        if let (Some(ret), Some(result)) = (sig.ret, result) {
            copies.push((ret, result));
        }

        self.pag.copies.extend(copies);

        Ok(())
    }
}
