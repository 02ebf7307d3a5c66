use std::iter::Peekable;
use std::str::FromStr;

use miette::{Diagnostic, SourceOffset, SourceSpan};
use thiserror::Error;

use super::syntax::{
    BlockDef, FuncDef, GlobalDef, InstBody, InstDef, Module, Name, Operand, ParamDef, Spanned,
    SpannedOperand,
};
use super::token::{Keyword, Special, Token, TokenType, TokenValue};
use super::{Lexer, LexerError};

use crate::ir::{BinOp, CastOp, FuncAttrs, InstTag, Type};
use crate::util::format_list;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("encountered an unexpected token: {actual} (expected {})", format_list(.expected, "or"))]
    #[diagnostic(code(parser::unexpected_token))]
    UnexpectedToken {
        expected: Vec<TokenType>,
        actual: TokenType,

        #[label]
        span: SourceSpan,
    },

    #[error("unknown type `{name}`")]
    #[diagnostic(code(parser::unknown_type))]
    UnknownType {
        name: String,

        #[label]
        span: SourceSpan,
    },

    #[error("unknown instruction `{name}`")]
    #[diagnostic(code(parser::unknown_opcode))]
    UnknownOpcode {
        name: String,

        #[label]
        span: SourceSpan,
    },

    #[error("unknown {what} `{name}`")]
    #[diagnostic(code(parser::unknown_operator))]
    UnknownOperator {
        what: &'static str,
        name: String,

        #[label]
        span: SourceSpan,
    },

    #[error("unknown function attribute `#{name}`")]
    #[diagnostic(code(parser::unknown_attr))]
    UnknownAttr {
        name: String,

        #[label]
        span: SourceSpan,
    },

    #[error("unknown instruction tag `!{name}`")]
    #[diagnostic(code(parser::unknown_tag))]
    UnknownTag {
        name: String,

        #[label]
        span: SourceSpan,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    LexerError(#[from] LexerError),
}

trait Matcher {
    fn matches(&self, token: &Token<'_>) -> bool;

    fn expected_tokens(&self) -> Vec<TokenType>;
}

impl Matcher for TokenType {
    fn matches(&self, token: &Token<'_>) -> bool {
        *self == token.ty()
    }

    fn expected_tokens(&self) -> Vec<TokenType> {
        vec![*self]
    }
}

impl Matcher for Special {
    fn matches(&self, token: &Token<'_>) -> bool {
        TokenType::Special(*self) == token.ty()
    }

    fn expected_tokens(&self) -> Vec<TokenType> {
        vec![TokenType::Special(*self)]
    }
}

impl Matcher for Keyword {
    fn matches(&self, token: &Token<'_>) -> bool {
        TokenType::Keyword(*self) == token.ty()
    }

    fn expected_tokens(&self) -> Vec<TokenType> {
        vec![TokenType::Keyword(*self)]
    }
}

impl<const N: usize> Matcher for [TokenType; N] {
    fn matches(&self, token: &Token<'_>) -> bool {
        self.contains(&token.ty())
    }

    fn expected_tokens(&self) -> Vec<TokenType> {
        self.to_vec()
    }
}

const OPERAND_TOKENS: [TokenType; 4] = [
    TokenType::Global,
    TokenType::Local,
    TokenType::Int,
    TokenType::Keyword(Keyword::Null),
];

fn parse_operator<T: FromStr>(
    what: &'static str,
    name: Name<'_>,
) -> Result<T, ParserError> {
    T::from_str(name.value).map_err(|_| ParserError::UnknownOperator {
        what,
        name: name.value.to_owned(),
        span: name.span,
    })
}

pub struct Parser<'buf> {
    lexer: Peekable<Lexer<'buf>>,
}

impl<'buf> Parser<'buf> {
    pub fn new(lexer: Lexer<'buf>) -> Self {
        Self {
            lexer: lexer.peekable(),
        }
    }

    fn peek_token(&mut self) -> Result<&Token<'buf>, ParserError> {
        if matches!(self.lexer.peek(), Some(Err(_))) {
            return match self.lexer.next() {
                Some(Err(e)) => Err(e.into()),
                _ => unreachable!(),
            };
        }

        match self.lexer.peek() {
            Some(Ok(token)) => Ok(token),
            Some(Err(_)) => unreachable!(),
            None => panic!("peeking after retrieving the Eof token"),
        }
    }

    fn next_token(&mut self) -> Result<Token<'buf>, ParserError> {
        self.peek_token()?;

        match self.lexer.next() {
            Some(Ok(token)) => Ok(token),
            _ => unreachable!(),
        }
    }

    fn make_span_from(&mut self, start: SourceOffset) -> Result<SourceSpan, ParserError> {
        let end = self.peek_token()?.span.offset();

        Ok((start.offset()..end.max(start.offset())).into())
    }

    fn unexpected(&mut self, expected: Vec<TokenType>) -> ParserError {
        match self.peek_token() {
            Ok(token) => ParserError::UnexpectedToken {
                expected,
                actual: token.ty(),
                span: token.span,
            },

            Err(e) => e,
        }
    }

    fn expect(&mut self, matcher: impl Matcher) -> Result<Token<'buf>, ParserError> {
        if matcher.matches(self.peek_token()?) {
            self.next_token()
        } else {
            Err(self.unexpected(matcher.expected_tokens()))
        }
    }

    fn try_consume(&mut self, matcher: impl Matcher) -> Result<Option<Token<'buf>>, ParserError> {
        if matcher.matches(self.peek_token()?) {
            self.next_token().map(Some)
        } else {
            Ok(None)
        }
    }

    fn peek(&mut self, matcher: impl Matcher) -> Result<bool, ParserError> {
        Ok(matcher.matches(self.peek_token()?))
    }

    pub fn parse(mut self) -> Result<Module<'buf>, ParserError> {
        let mut module = Module::default();

        loop {
            let token = self.peek_token()?;

            match token.value {
                TokenValue::Eof => break,
                TokenValue::Keyword(Keyword::Global) => module.globals.push(self.parse_global()?),
                TokenValue::Keyword(Keyword::Declare) => module.funcs.push(self.parse_func(false)?),
                TokenValue::Keyword(Keyword::Define) => module.funcs.push(self.parse_func(true)?),

                _ => {
                    return Err(self.unexpected(vec![
                        TokenType::Keyword(Keyword::Global),
                        TokenType::Keyword(Keyword::Declare),
                        TokenType::Keyword(Keyword::Define),
                        TokenType::Eof,
                    ]))
                }
            }
        }

        Ok(module)
    }

    fn parse_global_name(&mut self) -> Result<Name<'buf>, ParserError> {
        let token = self.expect(TokenType::Global)?;

        match token.value {
            TokenValue::Global(name) => Ok(Spanned::new(name, token.span)),
            _ => unreachable!(),
        }
    }

    fn parse_local_name(&mut self) -> Result<Name<'buf>, ParserError> {
        let token = self.expect(TokenType::Local)?;

        match token.value {
            TokenValue::Local(name) => Ok(Spanned::new(name, token.span)),
            _ => unreachable!(),
        }
    }

    fn parse_ident(&mut self) -> Result<Name<'buf>, ParserError> {
        let token = self.expect(TokenType::Ident)?;

        match token.value {
            TokenValue::Ident(ident) => Ok(Spanned::new(ident, token.span)),
            _ => unreachable!(),
        }
    }

    fn parse_type(&mut self) -> Result<Type, ParserError> {
        let ident = self.parse_ident()?;

        Type::from_str(ident.value).map_err(|_| ParserError::UnknownType {
            name: ident.value.to_owned(),
            span: ident.span,
        })
    }

    fn parse_global(&mut self) -> Result<GlobalDef<'buf>, ParserError> {
        self.expect(Keyword::Global)?;
        let name = self.parse_global_name()?;
        self.expect(Special::Colon)?;
        let ty = self.parse_type()?;

        let init = if self.try_consume(Special::Equals)?.is_some() {
            Some(self.parse_operand()?)
        } else {
            None
        };

        Ok(GlobalDef { name, ty, init })
    }

    fn parse_func(&mut self, define: bool) -> Result<FuncDef<'buf>, ParserError> {
        self.next_token()?;
        let name = self.parse_global_name()?;
        self.expect(Special::ParenLeft)?;

        let mut params = vec![];

        if !self.peek(Special::ParenRight)? {
            loop {
                let ty = self.parse_type()?;
                let name = if self.peek(TokenType::Local)? {
                    Some(self.parse_local_name()?)
                } else {
                    None
                };
                params.push(ParamDef { ty, name });

                if self.try_consume(Special::Comma)?.is_none() {
                    break;
                }
            }
        }

        self.expect(Special::ParenRight)?;

        let ret_ty = if self.try_consume(Special::Arrow)?.is_some() {
            self.parse_type()?
        } else {
            Type::Void
        };

        let mut attrs = FuncAttrs::empty();

        while let Some(token) = self.try_consume(TokenType::Attr)? {
            let TokenValue::Attr(attr) = token.value else {
                unreachable!()
            };

            attrs |= FuncAttrs::from_attr_name(attr).ok_or_else(|| ParserError::UnknownAttr {
                name: attr.to_owned(),
                span: token.span,
            })?;
        }

        let blocks = if define {
            Some(self.parse_body()?)
        } else {
            None
        };

        Ok(FuncDef {
            name,
            params,
            ret_ty,
            attrs,
            blocks,
        })
    }

    fn parse_body(&mut self) -> Result<Vec<BlockDef<'buf>>, ParserError> {
        self.expect(Special::BraceLeft)?;

        let mut blocks = vec![BlockDef {
            name: self.parse_ident()?,
            insts: vec![],
        }];
        self.expect(Special::Colon)?;

        loop {
            let token = self.peek_token()?;
            let start = token.span.offset().into();

            let inst = match token.value {
                TokenValue::Special(Special::BraceRight) => {
                    self.next_token()?;

                    break;
                }

                TokenValue::Local(_) => {
                    let name = self.parse_local_name()?;
                    self.expect(Special::Equals)?;
                    let opcode = self.parse_ident()?;

                    self.parse_inst(start, Some(name), opcode)?
                }

                TokenValue::Ident(_) => {
                    let ident = self.parse_ident()?;

                    if self.try_consume(Special::Colon)?.is_some() {
                        blocks.push(BlockDef {
                            name: ident,
                            insts: vec![],
                        });

                        continue;
                    }

                    self.parse_inst(start, None, ident)?
                }

                _ => {
                    return Err(self.unexpected(vec![
                        TokenType::Local,
                        TokenType::Ident,
                        TokenType::Special(Special::BraceRight),
                    ]))
                }
            };

            blocks
                .last_mut()
                .expect("the entry block is always present")
                .insts
                .push(inst);
        }

        Ok(blocks)
    }

    fn parse_operand(&mut self) -> Result<SpannedOperand<'buf>, ParserError> {
        let token = self.expect(OPERAND_TOKENS)?;

        let operand = match token.value {
            TokenValue::Global(name) => Operand::Global(name),
            TokenValue::Local(name) => Operand::Local(name),
            TokenValue::Int(value) => Operand::Int(value),
            TokenValue::Keyword(Keyword::Null) => Operand::Null,
            _ => unreachable!(),
        };

        Ok(Spanned::new(operand, token.span))
    }

    fn parse_operand_list(&mut self, end: Special) -> Result<Vec<SpannedOperand<'buf>>, ParserError> {
        let mut operands = vec![];

        if !self.peek(end)? {
            loop {
                operands.push(self.parse_operand()?);

                if self.try_consume(Special::Comma)?.is_none() {
                    break;
                }
            }
        }

        Ok(operands)
    }

    fn parse_label(&mut self) -> Result<Name<'buf>, ParserError> {
        self.expect(Keyword::Label)?;

        self.parse_local_name()
    }

    fn parse_binary_operands(
        &mut self,
    ) -> Result<(SpannedOperand<'buf>, SpannedOperand<'buf>), ParserError> {
        let lhs = self.parse_operand()?;
        self.expect(Special::Comma)?;
        let rhs = self.parse_operand()?;

        Ok((lhs, rhs))
    }

    fn parse_inst(
        &mut self,
        start: SourceOffset,
        name: Option<Name<'buf>>,
        opcode: Name<'buf>,
    ) -> Result<InstDef<'buf>, ParserError> {
        let body = match opcode.value {
            "alloca" => InstBody::Alloca {
                ty: self.parse_type()?,
            },

            "load" => {
                let ty = self.parse_type()?;
                self.expect(Special::Comma)?;

                InstBody::Load {
                    ty,
                    ptr: self.parse_operand()?,
                }
            }

            "store" => {
                let (value, ptr) = self.parse_binary_operands()?;

                InstBody::Store { value, ptr }
            }

            "atomicrmw" => {
                let op = parse_operator("atomic operation", self.parse_ident()?)?;
                let ty = self.parse_type()?;
                let (ptr, value) = self.parse_binary_operands()?;

                InstBody::AtomicRmw { op, ty, ptr, value }
            }

            "cmpxchg" => {
                let ty = self.parse_type()?;
                let (ptr, expected) = self.parse_binary_operands()?;
                self.expect(Special::Comma)?;
                let new = self.parse_operand()?;

                InstBody::CmpXchg {
                    ty,
                    ptr,
                    expected,
                    new,
                }
            }

            "getelementptr" => {
                let base = self.parse_operand()?;
                let mut indices = vec![];

                while self.try_consume(Special::Comma)?.is_some() {
                    indices.push(self.parse_operand()?);
                }

                InstBody::Gep { base, indices }
            }

            "icmp" => {
                let pred = parse_operator("comparison predicate", self.parse_ident()?)?;
                let (lhs, rhs) = self.parse_binary_operands()?;

                InstBody::Cmp { pred, lhs, rhs }
            }

            "phi" => {
                let ty = self.parse_type()?;
                let mut incoming = vec![];

                loop {
                    self.expect(Special::BracketLeft)?;
                    let value = self.parse_operand()?;
                    self.expect(Special::Comma)?;
                    let block = self.parse_local_name()?;
                    self.expect(Special::BracketRight)?;
                    incoming.push((value, block));

                    if self.try_consume(Special::Comma)?.is_none() {
                        break;
                    }
                }

                InstBody::Phi { ty, incoming }
            }

            "select" => {
                let ty = self.parse_type()?;
                let (cond, then_value) = self.parse_binary_operands()?;
                self.expect(Special::Comma)?;
                let else_value = self.parse_operand()?;

                InstBody::Select {
                    ty,
                    cond,
                    then_value,
                    else_value,
                }
            }

            "call" => {
                let ty = if self.peek(TokenType::Ident)? {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let callee = self.parse_operand()?;
                self.expect(Special::ParenLeft)?;
                let args = self.parse_operand_list(Special::ParenRight)?;
                self.expect(Special::ParenRight)?;

                InstBody::Call { ty, callee, args }
            }

            "ret" => {
                let value = match self.peek_token()?.value {
                    TokenValue::Ident("void") => {
                        self.next_token()?;

                        None
                    }

                    _ => Some(self.parse_operand()?),
                };

                InstBody::Ret { value }
            }

            "br" => {
                if self.peek(Keyword::Label)? {
                    InstBody::Br {
                        target: self.parse_label()?,
                    }
                } else {
                    let cond = self.parse_operand()?;
                    self.expect(Special::Comma)?;
                    let then_block = self.parse_label()?;
                    self.expect(Special::Comma)?;
                    let else_block = self.parse_label()?;

                    InstBody::CondBr {
                        cond,
                        then_block,
                        else_block,
                    }
                }
            }

            "unreachable" => InstBody::Unreachable,

            other => {
                if let Ok(op) = CastOp::from_str(other) {
                    let value = self.parse_operand()?;
                    self.expect(Keyword::To)?;

                    InstBody::Cast {
                        op,
                        value,
                        ty: self.parse_type()?,
                    }
                } else if let Ok(op) = BinOp::from_str(other) {
                    let ty = self.parse_type()?;
                    let (lhs, rhs) = self.parse_binary_operands()?;

                    InstBody::Binary { op, ty, lhs, rhs }
                } else {
                    return Err(ParserError::UnknownOpcode {
                        name: other.to_owned(),
                        span: opcode.span,
                    });
                }
            }
        };

        let span = self.make_span_from(start)?;

        let tag = match self.try_consume(TokenType::Tag)? {
            Some(token) => {
                let TokenValue::Tag(tag) = token.value else {
                    unreachable!()
                };

                InstTag::from_str(tag).map_err(|_| ParserError::UnknownTag {
                    name: tag.to_owned(),
                    span: token.span,
                })?
            }

            None => InstTag::Untagged,
        };

        Ok(InstDef {
            name,
            body,
            tag,
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Cursor;

    fn parse(source: &str) -> Result<Module<'_>, ParserError> {
        Parser::new(Lexer::new(Cursor::new(source))).parse()
    }

    #[test]
    fn test_parse_function() {
        let module = parse(
            "declare @malloc(i64) -> ptr #allocator
             define @main(ptr %arg) -> i64 #closure {
             entry:
               %p = alloca i64
               %v = load i64, %p !unsafe.full
               br label %exit
             exit:
               ret %v
             }",
        )
        .unwrap();

        assert_eq!(module.funcs.len(), 2);
        assert!(module.funcs[0].blocks.is_none());
        assert_eq!(module.funcs[0].attrs, FuncAttrs::ALLOCATOR);

        let main = &module.funcs[1];
        assert_eq!(main.attrs, FuncAttrs::CLOSURE);
        assert_eq!(main.params[0].name.map(|name| name.value), Some("arg"));

        let blocks = main.blocks.as_ref().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].insts.len(), 3);
        assert_eq!(blocks[0].insts[1].tag, InstTag::UnsafeFull);
        assert!(matches!(blocks[1].insts[0].body, InstBody::Ret { value: Some(_) }));
    }

    #[test]
    fn test_parse_call_with_optional_type() {
        let module = parse(
            "define @f() {
             entry:
               call @g(1, null)
               %r = call ptr %fp()
               ret void
             }",
        )
        .unwrap();

        let insts = &module.funcs[0].blocks.as_ref().unwrap()[0].insts;

        assert!(matches!(
            &insts[0].body,
            InstBody::Call { ty: None, args, .. } if args.len() == 2
        ));
        assert!(matches!(
            insts[1].body,
            InstBody::Call {
                ty: Some(Type::Ptr),
                ..
            }
        ));
        assert!(matches!(insts[2].body, InstBody::Ret { value: None }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse("define @f() { entry: %x = frobnicate i64 }"),
            Err(ParserError::UnknownOpcode { .. })
        ));
        assert!(matches!(
            parse("global @g: i128"),
            Err(ParserError::UnknownType { .. })
        ));
        assert!(matches!(
            parse("declare @f() #inline"),
            Err(ParserError::UnknownAttr { .. })
        ));
        assert!(matches!(
            parse("define @f() { entry: unreachable !unsafe }"),
            Err(ParserError::UnknownTag { .. })
        ));
        assert!(matches!(
            parse("define @f() { entry: store 1 %p }"),
            Err(ParserError::UnexpectedToken { .. })
        ));
    }
}
