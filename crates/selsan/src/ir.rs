//! An LLVM-like SSA IR for a compiled module.
//!
//! Functions consist of basic blocks of instructions. All entities live in
//! module-wide slot maps so that a [`Value`] is a plain `Copy` handle.

pub mod func;
pub mod inst;
pub mod printer;
pub mod ty;

use std::fmt::{self, Display};

use slotmap::{new_key_type, Key, SlotMap};

pub use self::func::{Block, Func, FuncAttrs, FuncBody, Param};
pub use self::inst::{
    AccessKind, BinOp, CastOp, CmpPred, Inst, InstKind, InstTag, MemTransferKind, Opcode, RmwOp,
};
pub use self::ty::Type;

new_key_type! {
    pub struct FuncId;
    pub struct GlobalId;
    pub struct BlockId;
    pub struct InstId;
    pub struct ParamId;
}

/// A program value: an operand or the result of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Inst(InstId),
    Param(ParamId),
    Global(GlobalId),
    Func(FuncId),
    Int(i64),
    Null,
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Option<Value>,
}

#[derive(Debug, Default, Clone)]
pub struct Module {
    pub funcs: SlotMap<FuncId, Func>,
    pub globals: SlotMap<GlobalId, Global>,
    pub insts: SlotMap<InstId, Inst>,
    pub params: SlotMap<ParamId, Param>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&mut self, name: impl Into<String>, ty: Type, init: Option<Value>) -> GlobalId {
        self.globals.insert(Global {
            name: name.into(),
            ty,
            init,
        })
    }

    /// Adds a function. A definition gets an empty body that blocks can be
    /// appended to; a declaration gets none.
    pub fn add_func(
        &mut self,
        name: impl Into<String>,
        params: Vec<(String, Type)>,
        ret_ty: Type,
        attrs: FuncAttrs,
        define: bool,
    ) -> FuncId {
        let func_id = self.funcs.insert(Func {
            name: name.into(),
            params: vec![],
            ret_ty,
            attrs,
            body: define.then(FuncBody::new),
        });

        let param_ids = params
            .into_iter()
            .map(|(name, ty)| {
                self.params.insert(Param {
                    name,
                    ty,
                    func: func_id,
                })
            })
            .collect();
        self.funcs[func_id].params = param_ids;

        func_id
    }

    /// Appends a new block to a function definition.
    ///
    /// # Panics
    /// Panics if the function is a declaration.
    pub fn add_block(&mut self, func_id: FuncId, name: impl Into<String>) -> BlockId {
        let body = self.funcs[func_id]
            .body_mut()
            .expect("cannot add a block to a declaration");
        let block_id = body.blocks.insert(Block {
            name: name.into(),
            insts: vec![],
        });
        body.order.push(block_id);

        block_id
    }

    pub fn push_inst(
        &mut self,
        func_id: FuncId,
        block_id: BlockId,
        name: Option<String>,
        kind: InstKind,
        ty: Type,
    ) -> InstId {
        let inst_id = self.insts.insert(Inst {
            name,
            kind,
            ty,
            func: func_id,
            block: block_id,
            tag: Default::default(),
        });
        self.funcs[func_id]
            .body_mut()
            .expect("cannot add an instruction to a declaration")
            .blocks[block_id]
            .insts
            .push(inst_id);

        inst_id
    }

    pub fn value_ty(&self, value: Value) -> Type {
        match value {
            Value::Inst(inst_id) => self.insts[inst_id].ty,
            Value::Param(param_id) => self.params[param_id].ty,
            Value::Global(_) | Value::Func(_) | Value::Null => Type::Ptr,
            Value::Int(_) => Type::I64,
        }
    }

    pub fn is_pointer(&self, value: Value) -> bool {
        self.value_ty(value).is_pointer()
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .find(|(_, func)| func.name == name)
            .map(|(func_id, _)| func_id)
    }

    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .find(|(_, global)| global.name == name)
            .map(|(global_id, _)| global_id)
    }

    /// Instructions of a function in layout order (none for a declaration).
    pub fn func_insts(&self, func_id: FuncId) -> impl Iterator<Item = InstId> + '_ {
        self.funcs[func_id]
            .body()
            .into_iter()
            .flat_map(|body| body.insts())
    }

    /// All instructions of the module, function by function, in layout order.
    pub fn all_insts(&self) -> impl Iterator<Item = InstId> + '_ {
        self.funcs.keys().flat_map(|func_id| self.func_insts(func_id))
    }

    pub fn defined_funcs(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.funcs
            .iter()
            .filter(|(_, func)| !func.is_declaration())
            .map(|(func_id, _)| func_id)
    }

    /// Looks up a value by a path: `@name` for globals and functions,
    /// `func/%name` for parameters and named instructions.
    pub fn find_value(&self, path: &str) -> Option<Value> {
        if let Some(name) = path.strip_prefix('@') {
            return self
                .global_by_name(name)
                .map(Value::Global)
                .or_else(|| self.func_by_name(name).map(Value::Func));
        }

        let (func_name, local) = path.rsplit_once("/%")?;
        let func_id = self.func_by_name(func_name.strip_prefix('@').unwrap_or(func_name))?;
        let func = &self.funcs[func_id];

        func.params
            .iter()
            .copied()
            .find(|&param_id| self.params[param_id].name == local)
            .map(Value::Param)
            .or_else(|| {
                self.func_insts(func_id)
                    .find(|&inst_id| self.insts[inst_id].name.as_deref() == Some(local))
                    .map(Value::Inst)
            })
    }

    pub fn display_value(&self, value: Value) -> impl Display + '_ {
        ValuePrinter {
            module: self,
            value,
        }
    }

    pub fn display_inst_name(&self, inst_id: InstId) -> impl Display + '_ {
        InstNamePrinter {
            module: self,
            inst_id,
        }
    }
}

pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'))
}

pub(crate) fn fmt_name(f: &mut fmt::Formatter<'_>, sigil: char, name: &str) -> fmt::Result {
    if is_plain_name(name) {
        write!(f, "{sigil}{name}")
    } else {
        write!(f, "{sigil}\"{name}\"")
    }
}

struct InstNamePrinter<'a> {
    module: &'a Module,
    inst_id: InstId,
}

impl Display for InstNamePrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module.insts[self.inst_id].name {
            Some(name) => fmt_name(f, '%', name),
            None => write!(f, "%.t{}", self.inst_id.data().as_ffi() as u32),
        }
    }
}

struct ValuePrinter<'a> {
    module: &'a Module,
    value: Value,
}

impl Display for ValuePrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Inst(inst_id) => self.module.display_inst_name(inst_id).fmt(f),
            Value::Param(param_id) => fmt_name(f, '%', &self.module.params[param_id].name),
            Value::Global(global_id) => fmt_name(f, '@', &self.module.globals[global_id].name),
            Value::Func(func_id) => fmt_name(f, '@', &self.module.funcs[func_id].name),
            Value::Int(value) => write!(f, "{value}"),
            Value::Null => write!(f, "null"),
        }
    }
}
