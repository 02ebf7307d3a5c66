use std::fmt::{self, Display};
use std::iter::FusedIterator;

use miette::{Diagnostic, SourceOffset, SourceSpan};
use thiserror::Error;

use super::cursor::Cursor;
use super::token::{Keyword, Special, Token, TokenValue};

type ScanResult<'a> = Result<TokenValue<'a>, PosLexerError>;

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continuation(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.')
}

/// Characters allowed in an unquoted `@` or `%` name.
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-')
}

fn make_ident_matcher() -> impl FnMut(char) -> bool {
    let mut first = true;

    move |c| {
        if first {
            first = false;

            is_ident_start(c)
        } else {
            is_ident_continuation(c)
        }
    }
}

fn format_char(c: char) -> impl Display {
    struct CharFormatter(char);

    impl Display for CharFormatter {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.0.is_ascii_graphic() {
                write!(f, "{}", self.0)
            } else {
                write!(f, "U+{:04x}", self.0 as u32)
            }
        }
    }

    CharFormatter(c)
}

#[derive(Error, Diagnostic, Debug, Clone, Copy, Eq, PartialEq)]
pub enum LexerErrorKind {
    #[error("the quoted name is not terminated")]
    #[diagnostic(code(lexer::unterminated_name))]
    UnterminatedName,

    #[error("`{0}` must be followed by a name")]
    #[diagnostic(code(lexer::missing_name))]
    MissingName(char),

    #[error("the integer literal does not fit in 64 bits")]
    #[diagnostic(code(lexer::integer_overflow))]
    IntegerOverflow,

    #[error("encountered an unrecognized character {}", format_char(*.0))]
    #[diagnostic(code(lexer::unrecognized_character))]
    UnrecognizedCharacter(char),
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct PosLexerError {
    end: SourceOffset,
    kind: LexerErrorKind,
}

impl PosLexerError {
    fn with_start(self, start: SourceOffset) -> LexerError {
        LexerError {
            kind: self.kind,
            span: (start.offset()..self.end.offset()).into(),
        }
    }
}

#[derive(Error, Diagnostic, Debug, Clone, Eq, PartialEq)]
pub struct LexerError {
    pub kind: LexerErrorKind,

    #[label]
    pub span: SourceSpan,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lexical analysis failed: {}", self.kind)
    }
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    eof: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(cursor: Cursor<'a>) -> Self {
        Self { cursor, eof: false }
    }

    pub fn pos(&self) -> SourceOffset {
        self.cursor.pos()
    }

    fn make_error_at_pos(&self, kind: LexerErrorKind) -> PosLexerError {
        PosLexerError {
            end: self.cursor.pos(),
            kind,
        }
    }

    fn skip_whitespace(&mut self) {
        self.cursor.consume_while(is_whitespace);
    }

    fn skip_comment(&mut self) {
        self.cursor.consume_while(|c| c != '\n');
    }

    /// Scans the part of a sigiled token that follows the sigil.
    fn scan_name(&mut self, sigil: char) -> Result<&'a str, PosLexerError> {
        if self.cursor.consume_expecting("\"").is_some() {
            let name = self.cursor.consume_while(|c| c != '"' && c != '\n');

            return match self.cursor.consume_expecting("\"") {
                Some(_) if name.is_empty() => Err(self.make_error_at_pos(LexerErrorKind::MissingName(sigil))),
                Some(_) => Ok(name),
                None => Err(self.make_error_at_pos(LexerErrorKind::UnterminatedName)),
            };
        }

        let name = self.cursor.consume_while(is_name_char);

        if name.is_empty() {
            Err(self.make_error_at_pos(LexerErrorKind::MissingName(sigil)))
        } else {
            Ok(name)
        }
    }

    fn scan_sigiled(&mut self, sigil: char) -> ScanResult<'a> {
        self.cursor.next();
        let name = self.scan_name(sigil)?;

        Ok(match sigil {
            '@' => TokenValue::Global(name),
            '%' => TokenValue::Local(name),
            '#' => TokenValue::Attr(name),
            '!' => TokenValue::Tag(name),
            _ => unreachable!(),
        })
    }

    fn scan_ident(&mut self) -> ScanResult<'a> {
        let ident = self.cursor.consume_while(make_ident_matcher());
        debug_assert!(!ident.is_empty());

        Ok(match Keyword::parse(ident) {
            Some(kw) => TokenValue::Keyword(kw),
            None => TokenValue::Ident(ident),
        })
    }

    fn scan_number(&mut self) -> ScanResult<'a> {
        let buf = self.cursor.remaining();
        let start_pos = self.cursor.pos().offset();
        self.cursor.consume_expecting("-");
        let digits = self.cursor.consume_while(|c| c.is_ascii_digit());
        debug_assert!(!digits.is_empty());

        let end_pos = self.cursor.pos().offset();

        buf[0..(end_pos - start_pos)]
            .parse::<i64>()
            .map(TokenValue::Int)
            .map_err(|_| self.make_error_at_pos(LexerErrorKind::IntegerOverflow))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof {
            return None;
        }

        let mut start;

        let scan_result = loop {
            start = self.cursor.pos();

            break match self.cursor.peek() {
                None => {
                    self.eof = true;

                    return Some(Ok(Token {
                        value: TokenValue::Eof,
                        span: (start.offset(), 0).into(),
                    }));
                }

                Some(';') => {
                    self.skip_comment();

                    continue;
                }

                Some(c) if is_whitespace(c) => {
                    self.skip_whitespace();

                    continue;
                }

                Some(c @ ('@' | '%' | '#' | '!')) => self.scan_sigiled(c),

                Some(c)
                    if c.is_ascii_digit()
                        || (c == '-' && self.cursor.peek_nth(1).is_some_and(|c| c.is_ascii_digit())) =>
                {
                    self.scan_number()
                }

                Some(c) if is_ident_start(c) => self.scan_ident(),

                Some(c) => match Special::parse_prefix(self.cursor.remaining()) {
                    Some(s) => {
                        self.cursor.consume_n(s.as_str().len());

                        Ok(TokenValue::Special(s))
                    }

                    None => Err(self.make_error_at_pos(LexerErrorKind::UnrecognizedCharacter(c))),
                },
            };
        };

        Some(match scan_result {
            Ok(value) => Ok(Token {
                span: (start.offset()..self.pos().offset()).into(),
                value,
            }),

            Err(err) => {
                self.eof = true;

                Err(err.with_start(start))
            }
        })
    }
}

impl<'a> FusedIterator for Lexer<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Result<Vec<TokenValue<'_>>, LexerError> {
        Lexer::new(Cursor::new(source))
            .map(|token| token.map(|token| token.value))
            .collect()
    }

    #[test]
    fn test_lex_instruction() {
        assert_eq!(
            lex("%v = load i64, %p !unsafe.full ; trailing").unwrap(),
            vec![
                TokenValue::Local("v"),
                TokenValue::Special(Special::Equals),
                TokenValue::Ident("load"),
                TokenValue::Ident("i64"),
                TokenValue::Special(Special::Comma),
                TokenValue::Local("p"),
                TokenValue::Tag("unsafe.full"),
                TokenValue::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_quoted_names_and_numbers() {
        assert_eq!(
            lex("define @\"main::{{closure}}\"() -> ptr #closure -12").unwrap(),
            vec![
                TokenValue::Keyword(Keyword::Define),
                TokenValue::Global("main::{{closure}}"),
                TokenValue::Special(Special::ParenLeft),
                TokenValue::Special(Special::ParenRight),
                TokenValue::Special(Special::Arrow),
                TokenValue::Ident("ptr"),
                TokenValue::Attr("closure"),
                TokenValue::Int(-12),
                TokenValue::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_errors() {
        let err = lex("%\"unterminated").unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::UnterminatedName);

        let err = lex("store 1, % ").unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::MissingName('%'));

        let err = lex("99999999999999999999").unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::IntegerOverflow);

        let err = lex("  ^").unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::UnrecognizedCharacter('^'));
        assert_eq!(err.span, (2, 0).into());
    }
}
