//! The unresolved syntax tree produced by the parser.
//!
//! Names are kept as source slices; [`super::resolve`] turns them into ids.

use miette::SourceSpan;

use crate::ir::{BinOp, CastOp, CmpPred, FuncAttrs, InstTag, RmwOp, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: SourceSpan,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: SourceSpan) -> Self {
        Self { value, span }
    }
}

pub type Name<'buf> = Spanned<&'buf str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<'buf> {
    Global(&'buf str),
    Local(&'buf str),
    Int(i64),
    Null,
}

pub type SpannedOperand<'buf> = Spanned<Operand<'buf>>;

#[derive(Debug, Clone, Default)]
pub struct Module<'buf> {
    pub globals: Vec<GlobalDef<'buf>>,
    pub funcs: Vec<FuncDef<'buf>>,
}

#[derive(Debug, Clone)]
pub struct GlobalDef<'buf> {
    pub name: Name<'buf>,
    pub ty: Type,
    pub init: Option<SpannedOperand<'buf>>,
}

#[derive(Debug, Clone)]
pub struct ParamDef<'buf> {
    pub ty: Type,
    pub name: Option<Name<'buf>>,
}

#[derive(Debug, Clone)]
pub struct FuncDef<'buf> {
    pub name: Name<'buf>,
    pub params: Vec<ParamDef<'buf>>,
    pub ret_ty: Type,
    pub attrs: FuncAttrs,

    /// `None` for a declaration.
    pub blocks: Option<Vec<BlockDef<'buf>>>,
}

#[derive(Debug, Clone)]
pub struct BlockDef<'buf> {
    pub name: Name<'buf>,
    pub insts: Vec<InstDef<'buf>>,
}

#[derive(Debug, Clone)]
pub struct InstDef<'buf> {
    pub name: Option<Name<'buf>>,
    pub body: InstBody<'buf>,
    pub tag: InstTag,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum InstBody<'buf> {
    Alloca {
        ty: Type,
    },

    Load {
        ty: Type,
        ptr: SpannedOperand<'buf>,
    },

    Store {
        value: SpannedOperand<'buf>,
        ptr: SpannedOperand<'buf>,
    },

    AtomicRmw {
        op: RmwOp,
        ty: Type,
        ptr: SpannedOperand<'buf>,
        value: SpannedOperand<'buf>,
    },

    CmpXchg {
        ty: Type,
        ptr: SpannedOperand<'buf>,
        expected: SpannedOperand<'buf>,
        new: SpannedOperand<'buf>,
    },

    Gep {
        base: SpannedOperand<'buf>,
        indices: Vec<SpannedOperand<'buf>>,
    },

    Cast {
        op: CastOp,
        value: SpannedOperand<'buf>,
        ty: Type,
    },

    Binary {
        op: BinOp,
        ty: Type,
        lhs: SpannedOperand<'buf>,
        rhs: SpannedOperand<'buf>,
    },

    Cmp {
        pred: CmpPred,
        lhs: SpannedOperand<'buf>,
        rhs: SpannedOperand<'buf>,
    },

    Phi {
        ty: Type,
        incoming: Vec<(SpannedOperand<'buf>, Name<'buf>)>,
    },

    Select {
        ty: Type,
        cond: SpannedOperand<'buf>,
        then_value: SpannedOperand<'buf>,
        else_value: SpannedOperand<'buf>,
    },

    Call {
        ty: Option<Type>,
        callee: SpannedOperand<'buf>,
        args: Vec<SpannedOperand<'buf>>,
    },

    Ret {
        value: Option<SpannedOperand<'buf>>,
    },

    Br {
        target: Name<'buf>,
    },

    CondBr {
        cond: SpannedOperand<'buf>,
        then_block: Name<'buf>,
        else_block: Name<'buf>,
    },

    Unreachable,
}
