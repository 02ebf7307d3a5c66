use bitflags::bitflags;
use slotmap::SlotMap;

use super::ty::Type;
use super::{BlockId, FuncId, InstId, ParamId};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FuncAttrs: u8 {
        /// The emitter must instrument this function.
        const SANITIZE_ADDRESS = 1 << 0;

        /// A captured-environment callable that was found to be an unsafe object.
        const UNSAFE_CLOSURE = 1 << 1;

        /// The front end lowered this function from a closure.
        const CLOSURE = 1 << 2;

        /// Calls to this declaration return fresh heap memory.
        const ALLOCATOR = 1 << 3;
    }
}

impl FuncAttrs {
    const NAMES: [(Self, &'static str); 4] = [
        (Self::SANITIZE_ADDRESS, "sanitize_address"),
        (Self::UNSAFE_CLOSURE, "unsafe_closure"),
        (Self::CLOSURE, "closure"),
        (Self::ALLOCATOR, "allocator"),
    ];

    pub fn from_attr_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|&&(_, attr_name)| attr_name == name)
            .map(|&(attr, _)| attr)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        Self::NAMES
            .iter()
            .filter(|&&(attr, _)| self.contains(attr))
            .map(|&(_, name)| name)
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub func: FuncId,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
}

#[derive(Debug, Default, Clone)]
pub struct FuncBody {
    pub blocks: SlotMap<BlockId, Block>,
    pub order: Vec<BlockId>,
}

impl FuncBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.order.first().copied()
    }

    /// Instructions in layout order.
    pub fn insts(&self) -> impl Iterator<Item = InstId> + '_ {
        self.order
            .iter()
            .flat_map(move |&block_id| self.blocks[block_id].insts.iter().copied())
    }
}

#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub params: Vec<ParamId>,
    pub ret_ty: Type,
    pub attrs: FuncAttrs,
    pub body: Option<FuncBody>,
}

impl Func {
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn is_unsafe_closure(&self) -> bool {
        self.attrs.contains(FuncAttrs::UNSAFE_CLOSURE)
    }

    pub fn requires_instrumentation(&self) -> bool {
        self.attrs.contains(FuncAttrs::SANITIZE_ADDRESS)
    }

    pub fn body(&self) -> Option<&FuncBody> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut FuncBody> {
        self.body.as_mut()
    }
}
