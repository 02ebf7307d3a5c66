use std::iter;

use strum::{Display, EnumString};

use crate::util::try_match;

use super::ty::Type;
use super::{BlockId, FuncId, Value};

/// The instrumentation decision attached to an instruction.
///
/// `UnsafeFull` doubles as the syntactic marker emitted by the front end for
/// instructions lowered from unsafe code.
#[derive(Display, EnumString, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstTag {
    #[default]
    #[strum(serialize = "untagged")]
    Untagged,

    #[strum(serialize = "unsafe.full")]
    UnsafeFull,

    #[strum(serialize = "selective")]
    Selective,

    #[strum(serialize = "nosanitize")]
    NoSanitize,
}

impl InstTag {
    /// Whether the emitter must instrument an instruction carrying this tag
    /// inside a function that requires instrumentation.
    pub fn is_instrumented(&self) -> bool {
        !matches!(self, Self::NoSanitize)
    }
}

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum CastOp {
    Bitcast,
    PtrToInt,
    IntToPtr,
    Zext,
    Sext,
    Trunc,
}

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemTransferKind {
    Copy,
    Move,
}

impl MemTransferKind {
    pub fn intrinsic_name(&self) -> &'static str {
        match self {
            Self::Copy => "llvm.memcpy",
            Self::Move => "llvm.memmove",
        }
    }
}

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Alloca,
    Load,
    Store,
    AtomicRmw,
    CmpXchg,
    GetElementPtr,
    Cast,
    Binary,
    ICmp,
    Phi,
    Select,
    Call,
    MemTransfer,
    MemSet,
    Intrinsic,
    Ret,
    Br,
    Unreachable,
}

/// The categories of instructions the sanitizer cares about.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Load,
    Store,
    AtomicRmw,
    CmpXchg,
    Call,
    MemTransfer,
    Other,
}

impl AccessKind {
    /// Instructions the final sweep and the emitter consider at all.
    pub fn is_interesting(&self) -> bool {
        !matches!(self, Self::Other)
    }

    /// Interesting instructions that access memory directly (calls excluded).
    pub fn is_memory_access(&self) -> bool {
        !matches!(self, Self::Call | Self::Other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Alloca {
        ty: Type,
    },

    Load {
        ptr: Value,
    },

    Store {
        value: Value,
        ptr: Value,
    },

    AtomicRmw {
        op: RmwOp,
        ptr: Value,
        value: Value,
    },

    CmpXchg {
        ptr: Value,
        expected: Value,
        new: Value,
    },

    Gep {
        base: Value,
        indices: Vec<Value>,
    },

    Cast {
        op: CastOp,
        value: Value,
    },

    Binary {
        op: BinOp,
        lhs: Value,
        rhs: Value,
    },

    Cmp {
        pred: CmpPred,
        lhs: Value,
        rhs: Value,
    },

    Phi {
        incoming: Vec<(Value, BlockId)>,
    },

    Select {
        cond: Value,
        then_value: Value,
        else_value: Value,
    },

    Call {
        callee: Value,
        args: Vec<Value>,
    },

    MemTransfer {
        kind: MemTransferKind,
        dst: Value,
        src: Value,
        len: Value,
    },

    MemSet {
        dst: Value,
        byte: Value,
        len: Value,
    },

    Intrinsic {
        name: String,
        args: Vec<Value>,
    },

    Ret {
        value: Option<Value>,
    },

    Br {
        target: BlockId,
    },

    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },

    Unreachable,
}

impl InstKind {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Alloca { .. } => Opcode::Alloca,
            Self::Load { .. } => Opcode::Load,
            Self::Store { .. } => Opcode::Store,
            Self::AtomicRmw { .. } => Opcode::AtomicRmw,
            Self::CmpXchg { .. } => Opcode::CmpXchg,
            Self::Gep { .. } => Opcode::GetElementPtr,
            Self::Cast { .. } => Opcode::Cast,
            Self::Binary { .. } => Opcode::Binary,
            Self::Cmp { .. } => Opcode::ICmp,
            Self::Phi { .. } => Opcode::Phi,
            Self::Select { .. } => Opcode::Select,
            Self::Call { .. } => Opcode::Call,
            Self::MemTransfer { .. } => Opcode::MemTransfer,
            Self::MemSet { .. } => Opcode::MemSet,
            Self::Intrinsic { .. } => Opcode::Intrinsic,
            Self::Ret { .. } => Opcode::Ret,
            Self::Br { .. } | Self::CondBr { .. } => Opcode::Br,
            Self::Unreachable => Opcode::Unreachable,
        }
    }

    pub fn access_kind(&self) -> AccessKind {
        match self {
            Self::Load { .. } => AccessKind::Load,
            Self::Store { .. } => AccessKind::Store,
            Self::AtomicRmw { .. } => AccessKind::AtomicRmw,
            Self::CmpXchg { .. } => AccessKind::CmpXchg,
            Self::Call { .. } => AccessKind::Call,
            Self::MemTransfer { .. } => AccessKind::MemTransfer,

            Self::Alloca { .. }
            | Self::Gep { .. }
            | Self::Cast { .. }
            | Self::Binary { .. }
            | Self::Cmp { .. }
            | Self::Phi { .. }
            | Self::Select { .. }
            | Self::MemSet { .. }
            | Self::Intrinsic { .. }
            | Self::Ret { .. }
            | Self::Br { .. }
            | Self::CondBr { .. }
            | Self::Unreachable => AccessKind::Other,
        }
    }

    /// The address operand of a single-location memory access.
    pub fn pointer_operand(&self) -> Option<Value> {
        match *self {
            Self::Load { ptr }
            | Self::Store { ptr, .. }
            | Self::AtomicRmw { ptr, .. }
            | Self::CmpXchg { ptr, .. } => Some(ptr),

            _ => None,
        }
    }

    /// The operand position holding the called function, if this is a call.
    ///
    /// Call operands are laid out as the arguments followed by the callee.
    pub fn callee_index(&self) -> Option<usize> {
        try_match!(self, Self::Call { args, .. } => args.len())
    }

    pub fn operand_count(&self) -> usize {
        match self {
            Self::Alloca { .. } | Self::Br { .. } | Self::Unreachable => 0,
            Self::Load { .. } | Self::Cast { .. } | Self::CondBr { .. } => 1,
            Self::Store { .. } | Self::AtomicRmw { .. } | Self::Binary { .. } | Self::Cmp { .. } => 2,
            Self::CmpXchg { .. } | Self::Select { .. } | Self::MemTransfer { .. } | Self::MemSet { .. } => 3,
            Self::Gep { indices, .. } => indices.len() + 1,
            Self::Phi { incoming } => incoming.len(),
            Self::Call { args, .. } => args.len() + 1,
            Self::Intrinsic { args, .. } => args.len(),
            Self::Ret { value } => value.is_some() as usize,
        }
    }

    pub fn nth_operand(&self, n: usize) -> Option<Value> {
        match self {
            Self::Alloca { .. } | Self::Br { .. } | Self::Unreachable => None,

            Self::Load { ptr } => (n == 0).then_some(*ptr),
            Self::Cast { value, .. } => (n == 0).then_some(*value),
            Self::CondBr { cond, .. } => (n == 0).then_some(*cond),
            Self::Ret { value } => (*value).filter(|_| n == 0),

            Self::Store { value, ptr } => [*value, *ptr].get(n).copied(),
            Self::AtomicRmw { ptr, value, .. } => [*ptr, *value].get(n).copied(),
            Self::Binary { lhs, rhs, .. } | Self::Cmp { lhs, rhs, .. } => [*lhs, *rhs].get(n).copied(),

            Self::CmpXchg { ptr, expected, new } => [*ptr, *expected, *new].get(n).copied(),
            Self::Select {
                cond,
                then_value,
                else_value,
            } => [*cond, *then_value, *else_value].get(n).copied(),
            Self::MemTransfer { dst, src, len, .. } => [*dst, *src, *len].get(n).copied(),
            Self::MemSet { dst, byte, len } => [*dst, *byte, *len].get(n).copied(),

            Self::Gep { base, indices } => iter::once(base).chain(indices).nth(n).copied(),
            Self::Phi { incoming } => incoming.get(n).map(|&(value, _)| value),
            Self::Call { callee, args } => args.iter().chain(iter::once(callee)).nth(n).copied(),
            Self::Intrinsic { args, .. } => args.get(n).copied(),
        }
    }

    pub fn operands(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.operand_count()).filter_map(move |n| self.nth_operand(n))
    }
}

#[derive(Debug, Clone)]
pub struct Inst {
    pub name: Option<String>,
    pub kind: InstKind,
    pub ty: Type,
    pub func: FuncId,
    pub block: BlockId,
    pub tag: InstTag,
}

impl Inst {
    pub fn has_result(&self) -> bool {
        !self.ty.is_void()
    }

    pub fn is_unsafe(&self) -> bool {
        self.tag == InstTag::UnsafeFull
    }
}

#[cfg(test)]
mod tests {
    use slotmap::KeyData;

    use super::*;
    use crate::ir::{FuncId, InstId};

    fn inst_value(idx: u64) -> Value {
        Value::Inst(InstId::from(KeyData::from_ffi(idx | (1 << 32))))
    }

    #[test]
    fn test_call_operands_put_callee_last() {
        let callee = Value::Func(FuncId::from(KeyData::from_ffi(1 << 32)));
        let kind = InstKind::Call {
            callee,
            args: vec![inst_value(0), Value::Int(4)],
        };

        assert_eq!(
            kind.operands().collect::<Vec<_>>(),
            vec![inst_value(0), Value::Int(4), callee]
        );
        assert_eq!(kind.callee_index(), Some(2));
        assert_eq!(kind.access_kind(), AccessKind::Call);
    }

    #[test]
    fn test_pointer_operand() {
        let store = InstKind::Store {
            value: Value::Int(1),
            ptr: inst_value(3),
        };
        let copy = InstKind::MemTransfer {
            kind: MemTransferKind::Copy,
            dst: inst_value(1),
            src: inst_value(2),
            len: Value::Int(8),
        };

        assert_eq!(store.pointer_operand(), Some(inst_value(3)));
        assert_eq!(copy.pointer_operand(), None);
        assert_eq!(copy.operands().count(), 3);
    }

    #[test]
    fn test_memset_is_not_interesting() {
        let memset = InstKind::MemSet {
            dst: inst_value(1),
            byte: Value::Int(0),
            len: Value::Int(8),
        };

        assert!(!memset.access_kind().is_interesting());
        assert!(AccessKind::MemTransfer.is_memory_access());
        assert!(AccessKind::Call.is_interesting());
        assert!(!AccessKind::Call.is_memory_access());
    }

    #[test]
    fn test_phi_operands() {
        let kind = InstKind::Phi {
            incoming: vec![(Value::Null, Default::default()), (inst_value(7), Default::default())],
        };

        assert_eq!(kind.nth_operand(1), Some(inst_value(7)));
        assert_eq!(kind.nth_operand(2), None);
    }

    #[test]
    fn test_tag_names() {
        assert_eq!(InstTag::UnsafeFull.to_string(), "unsafe.full");
        assert_eq!("nosanitize".parse::<InstTag>().unwrap(), InstTag::NoSanitize);
        assert!(!InstTag::NoSanitize.is_instrumented());
    }
}
