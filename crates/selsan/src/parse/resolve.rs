use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use log::trace;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use super::syntax::{self, BlockDef, FuncDef, InstBody, InstDef, Name, Operand, SpannedOperand};

use crate::ir::{BlockId, FuncId, InstKind, MemTransferKind, Module, Type, Value};

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("the {kind} `{name}` is defined multiple times")]
    #[diagnostic(code(resolve::redefinition))]
    Redefinition {
        kind: &'static str,
        name: String,

        #[label]
        span: SourceSpan,

        #[label = "previously defined here"]
        prev_span: SourceSpan,
    },

    #[error("the {kind} `{name}` is not defined")]
    #[diagnostic(code(resolve::undefined))]
    Undefined {
        kind: &'static str,
        name: String,

        #[label]
        span: SourceSpan,
    },

    #[error("an instruction producing no value cannot be named")]
    #[diagnostic(code(resolve::named_void))]
    NamedVoid {
        #[label]
        span: SourceSpan,
    },

    #[error("the function returns `{expected}`, but the returned value is `{actual}`")]
    #[diagnostic(code(resolve::return_type))]
    ReturnType {
        expected: Type,
        actual: Type,

        #[label]
        span: SourceSpan,
    },

    #[error("the intrinsic `{name}` takes {expected} arguments, {actual} given")]
    #[diagnostic(code(resolve::intrinsic_arity))]
    IntrinsicArity {
        name: String,
        expected: usize,
        actual: usize,

        #[label]
        span: SourceSpan,
    },
}

type Scope<'buf, T> = HashMap<&'buf str, (T, SourceSpan)>;

fn define<'buf, T>(
    scope: &mut Scope<'buf, T>,
    kind: &'static str,
    name: Name<'buf>,
    value: T,
) -> Result<(), ResolveError> {
    match scope.entry(name.value) {
        Entry::Occupied(entry) => Err(ResolveError::Redefinition {
            kind,
            name: name.value.to_owned(),
            span: name.span,
            prev_span: entry.get().1,
        }),

        Entry::Vacant(entry) => {
            entry.insert((value, name.span));

            Ok(())
        }
    }
}

fn lookup<T: Copy>(scope: &Scope<'_, T>, kind: &'static str, name: Name<'_>) -> Result<T, ResolveError> {
    scope
        .get(name.value)
        .map(|&(value, _)| value)
        .ok_or_else(|| ResolveError::Undefined {
            kind,
            name: name.value.to_owned(),
            span: name.span,
        })
}

fn memory_intrinsic(name: &str) -> Option<Option<MemTransferKind>> {
    if name.starts_with("llvm.memcpy") {
        Some(Some(MemTransferKind::Copy))
    } else if name.starts_with("llvm.memmove") {
        Some(Some(MemTransferKind::Move))
    } else if name.starts_with("llvm.memset") {
        Some(None)
    } else {
        None
    }
}

/// Turns a syntax tree into a [`Module`], binding names to ids.
pub struct Resolver<'buf> {
    module: Module,
    globals: Scope<'buf, Value>,
}

struct FuncScope<'buf> {
    locals: Scope<'buf, Value>,
    blocks: Scope<'buf, BlockId>,
}

impl<'buf> Resolver<'buf> {
    pub fn new() -> Self {
        Self {
            module: Module::new(),
            globals: Default::default(),
        }
    }

    pub fn process(mut self, syntax: &syntax::Module<'buf>) -> Result<Module, ResolveError> {
        let mut global_ids = Vec::with_capacity(syntax.globals.len());

        for global in &syntax.globals {
            let global_id = self.module.add_global(global.name.value, global.ty, None);
            define(&mut self.globals, "global", global.name, Value::Global(global_id))?;
            global_ids.push(global_id);
        }

        let mut func_ids = Vec::with_capacity(syntax.funcs.len());

        for func in &syntax.funcs {
            let params = func
                .params
                .iter()
                .map(|param| {
                    let name = param.name.map(|name| name.value.to_owned()).unwrap_or_default();

                    (name, param.ty)
                })
                .collect();

            let func_id = self.module.add_func(
                func.name.value,
                params,
                func.ret_ty,
                func.attrs,
                func.blocks.is_some(),
            );
            define(&mut self.globals, "global", func.name, Value::Func(func_id))?;
            func_ids.push(func_id);
        }

        for (global, global_id) in syntax.globals.iter().zip(global_ids) {
            if let Some(init) = global.init {
                let init = self.resolve_operand(None, init)?;
                self.module.globals[global_id].init = Some(init);
            }
        }

        for (func, func_id) in syntax.funcs.iter().zip(func_ids) {
            if let Some(blocks) = &func.blocks {
                self.resolve_body(func_id, func, blocks)?;
            }
        }

        Ok(self.module)
    }

    fn resolve_body(
        &mut self,
        func_id: FuncId,
        func: &FuncDef<'buf>,
        blocks: &[BlockDef<'buf>],
    ) -> Result<(), ResolveError> {
        trace!("resolving the body of @{}", func.name.value);

        let mut scope = FuncScope {
            locals: Default::default(),
            blocks: Default::default(),
        };

        let param_ids = self.module.funcs[func_id].params.clone();

        for (param, param_id) in func.params.iter().zip(param_ids) {
            if let Some(name) = param.name {
                define(&mut scope.locals, "local value", name, Value::Param(param_id))?;
            }
        }

        let mut insts = vec![];

        // instructions are created before their operands are resolved
        // so that forward references (e.g., from phis) work
        for block in blocks {
            let block_id = self.module.add_block(func_id, block.name.value);
            define(&mut scope.blocks, "block", block.name, block_id)?;

            for inst in &block.insts {
                let ty = self.result_ty(&inst.body);

                if inst.name.is_some() && ty.is_void() {
                    return Err(ResolveError::NamedVoid { span: inst.span });
                }

                let inst_id = self.module.push_inst(
                    func_id,
                    block_id,
                    inst.name.map(|name| name.value.to_owned()),
                    InstKind::Unreachable,
                    ty,
                );
                self.module.insts[inst_id].tag = inst.tag;

                if let Some(name) = inst.name {
                    define(&mut scope.locals, "local value", name, Value::Inst(inst_id))?;
                }

                insts.push((inst, inst_id));
            }
        }

        for (inst, inst_id) in insts {
            let kind = self.resolve_inst(&scope, inst)?;

            if let InstKind::Ret { value } = kind {
                self.check_return(func_id, value, inst.span)?;
            }

            self.module.insts[inst_id].kind = kind;
        }

        Ok(())
    }

    /// Integer literals fit any integer return type; anything else must
    /// match the declared type exactly.
    fn check_return(&self, func_id: FuncId, value: Option<Value>, span: SourceSpan) -> Result<(), ResolveError> {
        let expected = self.module.funcs[func_id].ret_ty;

        let (actual, matches) = match value {
            None => (Type::Void, expected.is_void()),
            Some(Value::Int(_)) => (Type::I64, expected.is_int()),

            Some(value) => {
                let ty = self.module.value_ty(value);

                (ty, ty == expected)
            }
        };

        if matches {
            Ok(())
        } else {
            Err(ResolveError::ReturnType {
                expected,
                actual,
                span,
            })
        }
    }

    fn result_ty(&self, body: &InstBody<'buf>) -> Type {
        match *body {
            InstBody::Alloca { .. } | InstBody::Gep { .. } => Type::Ptr,
            InstBody::Cmp { .. } => Type::I1,

            InstBody::Load { ty, .. }
            | InstBody::AtomicRmw { ty, .. }
            | InstBody::CmpXchg { ty, .. }
            | InstBody::Cast { ty, .. }
            | InstBody::Binary { ty, .. }
            | InstBody::Phi { ty, .. }
            | InstBody::Select { ty, .. }
            | InstBody::Call { ty: Some(ty), .. } => ty,

            // a direct call without an explicit type returns what the callee declares
            InstBody::Call {
                ty: None, callee, ..
            } => match callee.value {
                Operand::Global(name) => match self.globals.get(name) {
                    Some(&(Value::Func(func_id), _)) => self.module.funcs[func_id].ret_ty,
                    _ => Type::Void,
                },

                _ => Type::Void,
            },

            InstBody::Store { .. }
            | InstBody::Ret { .. }
            | InstBody::Br { .. }
            | InstBody::CondBr { .. }
            | InstBody::Unreachable => Type::Void,
        }
    }

    fn resolve_operand(
        &self,
        scope: Option<&FuncScope<'buf>>,
        operand: SpannedOperand<'buf>,
    ) -> Result<Value, ResolveError> {
        match operand.value {
            Operand::Global(name) => lookup(&self.globals, "global", Name::new(name, operand.span)),

            Operand::Local(name) => match scope {
                Some(scope) => lookup(&scope.locals, "local value", Name::new(name, operand.span)),

                None => Err(ResolveError::Undefined {
                    kind: "local value",
                    name: name.to_owned(),
                    span: operand.span,
                }),
            },

            Operand::Int(value) => Ok(Value::Int(value)),
            Operand::Null => Ok(Value::Null),
        }
    }

    fn resolve_operands(
        &self,
        scope: &FuncScope<'buf>,
        operands: &[SpannedOperand<'buf>],
    ) -> Result<Vec<Value>, ResolveError> {
        operands
            .iter()
            .map(|&operand| self.resolve_operand(Some(scope), operand))
            .collect()
    }

    fn resolve_inst(&self, scope: &FuncScope<'buf>, inst: &InstDef<'buf>) -> Result<InstKind, ResolveError> {
        let operand = |operand: SpannedOperand<'buf>| self.resolve_operand(Some(scope), operand);
        let block = |name: Name<'buf>| lookup(&scope.blocks, "block", name);

        Ok(match inst.body {
            InstBody::Alloca { ty } => InstKind::Alloca { ty },

            InstBody::Load { ptr, .. } => InstKind::Load { ptr: operand(ptr)? },

            InstBody::Store { value, ptr } => InstKind::Store {
                value: operand(value)?,
                ptr: operand(ptr)?,
            },

            InstBody::AtomicRmw { op, ptr, value, .. } => InstKind::AtomicRmw {
                op,
                ptr: operand(ptr)?,
                value: operand(value)?,
            },

            InstBody::CmpXchg {
                ptr, expected, new, ..
            } => InstKind::CmpXchg {
                ptr: operand(ptr)?,
                expected: operand(expected)?,
                new: operand(new)?,
            },

            InstBody::Gep { base, ref indices } => InstKind::Gep {
                base: operand(base)?,
                indices: self.resolve_operands(scope, indices)?,
            },

            InstBody::Cast { op, value, .. } => InstKind::Cast {
                op,
                value: operand(value)?,
            },

            InstBody::Binary { op, lhs, rhs, .. } => InstKind::Binary {
                op,
                lhs: operand(lhs)?,
                rhs: operand(rhs)?,
            },

            InstBody::Cmp { pred, lhs, rhs } => InstKind::Cmp {
                pred,
                lhs: operand(lhs)?,
                rhs: operand(rhs)?,
            },

            InstBody::Phi { ref incoming, .. } => InstKind::Phi {
                incoming: incoming
                    .iter()
                    .map(|&(value, block_name)| -> Result<_, ResolveError> {
                        Ok((operand(value)?, block(block_name)?))
                    })
                    .collect::<Result<_, _>>()?,
            },

            InstBody::Select {
                cond,
                then_value,
                else_value,
                ..
            } => InstKind::Select {
                cond: operand(cond)?,
                then_value: operand(then_value)?,
                else_value: operand(else_value)?,
            },

            InstBody::Call {
                callee, ref args, ..
            } => match callee.value {
                Operand::Global(name) if name.starts_with("llvm.") => {
                    self.resolve_intrinsic(scope, name, callee.span, args)?
                }

                _ => InstKind::Call {
                    callee: operand(callee)?,
                    args: self.resolve_operands(scope, args)?,
                },
            },

            InstBody::Ret { value } => InstKind::Ret {
                value: value.map(operand).transpose()?,
            },

            InstBody::Br { target } => InstKind::Br {
                target: block(target)?,
            },

            InstBody::CondBr {
                cond,
                then_block,
                else_block,
            } => InstKind::CondBr {
                cond: operand(cond)?,
                then_block: block(then_block)?,
                else_block: block(else_block)?,
            },

            InstBody::Unreachable => InstKind::Unreachable,
        })
    }

    fn resolve_intrinsic(
        &self,
        scope: &FuncScope<'buf>,
        name: &str,
        span: SourceSpan,
        args: &[SpannedOperand<'buf>],
    ) -> Result<InstKind, ResolveError> {
        let args = self.resolve_operands(scope, args)?;

        let Some(transfer_kind) = memory_intrinsic(name) else {
            return Ok(InstKind::Intrinsic {
                name: name.to_owned(),
                args,
            });
        };

        let [dst, src, len]: [Value; 3] = args.try_into().map_err(|args: Vec<Value>| {
            ResolveError::IntrinsicArity {
                name: name.to_owned(),
                expected: 3,
                actual: args.len(),
                span,
            }
        })?;

        Ok(match transfer_kind {
            Some(kind) => InstKind::MemTransfer {
                kind,
                dst,
                src,
                len,
            },

            None => InstKind::MemSet {
                dst,
                byte: src,
                len,
            },
        })
    }
}

impl Default for Resolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}
