use std::fmt::{self, Display};

use super::{fmt_name, FuncId, InstId, InstKind, InstTag, Module, Value};

struct InstPrinter<'a> {
    module: &'a Module,
    inst_id: InstId,
}

impl InstPrinter<'_> {
    fn value(&self, value: Value) -> impl Display + '_ {
        self.module.display_value(value)
    }

    fn values<'b>(&'b self, values: impl IntoIterator<Item = &'b Value>) -> impl Display + 'b {
        struct ValueList<'b>(&'b Module, Vec<Value>);

        impl Display for ValueList<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for (idx, &value) in self.1.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{}", self.0.display_value(value))?;
                }

                Ok(())
            }
        }

        ValueList(self.module, values.into_iter().copied().collect())
    }

    fn block_name(&self, f: &mut fmt::Formatter<'_>, block_id: super::BlockId) -> fmt::Result {
        let inst = &self.module.insts[self.inst_id];
        let body = self.module.funcs[inst.func]
            .body()
            .expect("instructions only live in function definitions");

        fmt_name(f, '%', &body.blocks[block_id].name)
    }
}

impl Display for InstPrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inst = &self.module.insts[self.inst_id];

        if inst.has_result() {
            write!(f, "{} = ", self.module.display_inst_name(self.inst_id))?;
        }

        match inst.kind {
            InstKind::Alloca { ty } => write!(f, "alloca {ty}")?,
            InstKind::Load { ptr } => write!(f, "load {}, {}", inst.ty, self.value(ptr))?,

            InstKind::Store { value, ptr } => {
                write!(f, "store {}, {}", self.value(value), self.value(ptr))?
            }

            InstKind::AtomicRmw { op, ptr, value } => write!(
                f,
                "atomicrmw {op} {} {}, {}",
                inst.ty,
                self.value(ptr),
                self.value(value)
            )?,

            InstKind::CmpXchg { ptr, expected, new } => write!(
                f,
                "cmpxchg {} {}, {}, {}",
                inst.ty,
                self.value(ptr),
                self.value(expected),
                self.value(new)
            )?,

            InstKind::Gep {
                base, ref indices, ..
            } => {
                write!(f, "getelementptr {}", self.value(base))?;

                if !indices.is_empty() {
                    write!(f, ", {}", self.values(indices))?;
                }
            }

            InstKind::Cast { op, value } => {
                write!(f, "{op} {} to {}", self.value(value), inst.ty)?
            }

            InstKind::Binary { op, lhs, rhs } => write!(
                f,
                "{op} {} {}, {}",
                inst.ty,
                self.value(lhs),
                self.value(rhs)
            )?,

            InstKind::Cmp { pred, lhs, rhs } => {
                write!(f, "icmp {pred} {}, {}", self.value(lhs), self.value(rhs))?
            }

            InstKind::Phi { ref incoming } => {
                write!(f, "phi {}", inst.ty)?;

                for (idx, &(value, block_id)) in incoming.iter().enumerate() {
                    write!(f, "{} [{}, ", if idx > 0 { "," } else { "" }, self.value(value))?;
                    self.block_name(f, block_id)?;
                    write!(f, "]")?;
                }
            }

            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => write!(
                f,
                "select {} {}, {}, {}",
                inst.ty,
                self.value(cond),
                self.value(then_value),
                self.value(else_value)
            )?,

            InstKind::Call { callee, ref args } => {
                write!(f, "call ")?;

                if inst.has_result() {
                    write!(f, "{} ", inst.ty)?;
                }

                write!(f, "{}({})", self.value(callee), self.values(args))?;
            }

            InstKind::MemTransfer {
                kind,
                dst,
                src,
                len,
            } => write!(
                f,
                "call @{}({})",
                kind.intrinsic_name(),
                self.values(&[dst, src, len])
            )?,

            InstKind::MemSet { dst, byte, len } => {
                write!(f, "call @llvm.memset({})", self.values(&[dst, byte, len]))?
            }

            InstKind::Intrinsic { ref name, ref args } => {
                write!(f, "call ")?;

                if inst.has_result() {
                    write!(f, "{} ", inst.ty)?;
                }

                fmt_name(f, '@', name)?;
                write!(f, "({})", self.values(args))?;
            }

            InstKind::Ret { value: None } => write!(f, "ret void")?,
            InstKind::Ret { value: Some(value) } => write!(f, "ret {}", self.value(value))?,

            InstKind::Br { target } => {
                write!(f, "br label ")?;
                self.block_name(f, target)?;
            }

            InstKind::CondBr {
                cond,
                then_block,
                else_block,
            } => {
                write!(f, "br {}, label ", self.value(cond))?;
                self.block_name(f, then_block)?;
                write!(f, ", label ")?;
                self.block_name(f, else_block)?;
            }

            InstKind::Unreachable => write!(f, "unreachable")?,
        }

        match inst.tag {
            InstTag::Untagged => Ok(()),
            tag => write!(f, " !{tag}"),
        }
    }
}

struct FuncPrinter<'a> {
    module: &'a Module,
    func_id: FuncId,
}

impl Display for FuncPrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = &self.module.funcs[self.func_id];

        write!(
            f,
            "{} ",
            if func.is_declaration() {
                "declare"
            } else {
                "define"
            }
        )?;
        fmt_name(f, '@', &func.name)?;
        write!(f, "(")?;

        for (idx, &param_id) in func.params.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }

            let param = &self.module.params[param_id];
            write!(f, "{}", param.ty)?;

            if !param.name.is_empty() {
                write!(f, " ")?;
                fmt_name(f, '%', &param.name)?;
            }
        }

        write!(f, ") -> {}", func.ret_ty)?;

        for attr in func.attrs.attr_names() {
            write!(f, " #{attr}")?;
        }

        let Some(body) = func.body() else {
            return writeln!(f);
        };

        writeln!(f, " {{")?;

        for &block_id in &body.order {
            let block = &body.blocks[block_id];
            writeln!(f, "{}:", block.name)?;

            for &inst_id in &block.insts {
                writeln!(f, "  {}", self.module.display_inst(inst_id))?;
            }
        }

        writeln!(f, "}}")
    }
}

impl Module {
    pub fn display_inst(&self, inst_id: InstId) -> impl Display + '_ {
        InstPrinter {
            module: self,
            inst_id,
        }
    }

    pub fn display_func(&self, func_id: FuncId) -> impl Display + '_ {
        FuncPrinter {
            module: self,
            func_id,
        }
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for global in self.globals.values() {
            write!(f, "global ")?;
            fmt_name(f, '@', &global.name)?;
            write!(f, ": {}", global.ty)?;

            if let Some(init) = global.init {
                write!(f, " = {}", self.display_value(init))?;
            }

            writeln!(f)?;
            first = false;
        }

        for func_id in self.funcs.keys() {
            if !first {
                writeln!(f)?;
            }

            write!(f, "{}", self.display_func(func_id))?;
            first = false;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::parse::parse;

    const SOURCE: &str = r#"global @g: ptr = @"main::{{closure}}"
global @n: i64 = -3

declare @malloc(i64) -> ptr #allocator

define @"main::{{closure}}"(ptr %env) -> i64 #closure {
entry:
  %p = alloca i64
  %m = call ptr @malloc(8)
  %v = load i64, %p !unsafe.full
  store %v, %m !selective
  %c = icmp eq %v, 0
  br %c, label %then, label %exit
then:
  %w = add i64 %v, 1
  %x = atomicrmw xchg i64 %p, %w
  %i = ptrtoint %m to i64
  call @llvm.memcpy(%m, %p, 8) !nosanitize
  br label %exit
exit:
  %r = phi i64 [%v, %entry], [%w, %then]
  ret %r
}
"#;

    #[test]
    fn test_print_round_trip() {
        let module = parse(SOURCE).unwrap();
        let printed = module.to_string();

        assert_eq!(printed, SOURCE);
        assert_eq!(parse(&printed).unwrap().to_string(), printed);
    }

    #[test]
    fn test_print_unnamed_values() {
        let module = parse(
            "declare @f() -> ptr
             define @g() {
             entry:
               call ptr @f()
               ret void
             }",
        )
        .unwrap();
        let printed = module.to_string();

        assert!(printed.contains("  %.t"), "{printed}");
        assert_eq!(parse(&printed).unwrap().to_string(), printed);
    }
}
