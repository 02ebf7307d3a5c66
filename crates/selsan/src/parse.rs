//! The `.sir` text format reader.

mod cursor;
mod lexer;
mod parser;
mod resolve;
pub mod syntax;
pub mod token;

pub use cursor::Cursor;
pub use lexer::{Lexer, LexerError, LexerErrorKind};
pub use parser::{Parser, ParserError};
pub use resolve::{ResolveError, Resolver};

use miette::Diagnostic;
use thiserror::Error;

use crate::ir::Module;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] ParserError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),
}

impl From<LexerError> for ParseError {
    fn from(e: LexerError) -> Self {
        Self::Syntax(e.into())
    }
}

pub fn parse(source: &str) -> Result<Module, ParseError> {
    let cursor = Cursor::new(source);
    let lexer = Lexer::new(cursor);
    let syntax = Parser::new(lexer).parse()?;

    Ok(Resolver::new().process(&syntax)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstKind, InstTag, MemTransferKind, Type, Value};

    #[test]
    fn test_resolve_forward_references() {
        let module = parse(
            "global @g: ptr = @f
             define @f(ptr %a) -> ptr {
             entry:
               br label %loop
             loop:
               %p = phi ptr [%a, %entry], [%q, %loop]
               %q = getelementptr %p, 8
               br label %loop
             }",
        )
        .unwrap();

        let f = module.func_by_name("f").unwrap();
        let g = module.global_by_name("g").unwrap();
        assert_eq!(module.globals[g].init, Some(Value::Func(f)));

        let Some(Value::Inst(p)) = module.find_value("f/%p") else {
            panic!("%p is not an instruction");
        };
        let Some(q) = module.find_value("f/%q") else {
            panic!("%q is not defined");
        };

        match &module.insts[p].kind {
            InstKind::Phi { incoming } => assert_eq!(incoming[1].0, q),
            kind => panic!("unexpected instruction {kind:?}"),
        }
    }

    #[test]
    fn test_resolve_call_types_and_intrinsics() {
        let module = parse(
            "declare @malloc(i64) -> ptr #allocator
             define @f() {
             entry:
               %m = call @malloc(16)
               %n = call ptr @malloc(8)
               call @llvm.memcpy.p0.p0.i64(%m, %n, 8) !unsafe.full
               call @llvm.memset.p0.i64(%m, 0, 16)
               %x = call i64 @llvm.ctpop.i64(7)
               ret void
             }",
        )
        .unwrap();

        let f = module.func_by_name("f").unwrap();
        let insts = module.func_insts(f).map(|inst_id| &module.insts[inst_id]).collect::<Vec<_>>();

        assert_eq!(insts[0].ty, Type::Ptr);
        assert_eq!(insts[1].ty, Type::Ptr);
        assert!(matches!(
            insts[2].kind,
            InstKind::MemTransfer {
                kind: MemTransferKind::Copy,
                ..
            }
        ));
        assert_eq!(insts[2].tag, InstTag::UnsafeFull);
        assert!(matches!(insts[3].kind, InstKind::MemSet { .. }));
        assert!(matches!(&insts[4].kind, InstKind::Intrinsic { name, .. } if name == "llvm.ctpop.i64"));
        assert_eq!(insts[4].ty, Type::I64);
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(
            parse("global @g: i64\nglobal @g: ptr"),
            Err(ParseError::Resolve(ResolveError::Redefinition { .. }))
        ));
        assert!(matches!(
            parse("define @f() { entry: store 1, %nope\n ret void }"),
            Err(ParseError::Resolve(ResolveError::Undefined { .. }))
        ));
        assert!(matches!(
            parse("define @f() { entry: br label %nowhere }"),
            Err(ParseError::Resolve(ResolveError::Undefined { kind: "block", .. }))
        ));
        assert!(matches!(
            parse("define @f(ptr %p) { entry: %s = store 1, %p\n ret void }"),
            Err(ParseError::Resolve(ResolveError::NamedVoid { .. }))
        ));
        assert!(matches!(
            parse("define @f(ptr %p) { entry: call @llvm.memcpy(%p, %p)\n ret void }"),
            Err(ParseError::Resolve(ResolveError::IntrinsicArity { actual: 2, .. }))
        ));
        assert!(matches!(
            parse("define @f() -> ptr { entry: ret 5 }"),
            Err(ParseError::Resolve(ResolveError::ReturnType {
                expected: Type::Ptr,
                actual: Type::I64,
                ..
            }))
        ));
        assert!(matches!(
            parse("define @f() -> i64 { entry: ret void }"),
            Err(ParseError::Resolve(ResolveError::ReturnType { .. }))
        ));
        assert!(matches!(
            parse("define @f(ptr %p) { entry: ret %p }"),
            Err(ParseError::Resolve(ResolveError::ReturnType { .. }))
        ));
        assert!(parse("define @f() -> i32 { entry: ret 5 }").is_ok());
        assert!(parse("define @f() -> ptr { entry: ret null }").is_ok());
    }
}
