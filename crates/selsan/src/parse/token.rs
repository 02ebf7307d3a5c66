use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::OnceLock;

use miette::SourceSpan;
use phf::phf_map;

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'buf> {
    pub span: SourceSpan,
    pub value: TokenValue<'buf>,
}

impl Token<'_> {
    pub fn ty(&self) -> TokenType {
        self.value.ty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Global,
    Local,
    Ident,
    Keyword(Keyword),
    Int,
    Attr,
    Tag,
    Special(Special),
    Eof,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global name"),
            Self::Local => write!(f, "local name"),
            Self::Ident => write!(f, "identifier"),
            Self::Keyword(kw) => write!(f, "`{}`", kw.as_str()),
            Self::Int => write!(f, "integer"),
            Self::Attr => write!(f, "attribute"),
            Self::Tag => write!(f, "instruction tag"),
            Self::Special(s) => write!(f, "`{}`", s.as_str()),
            Self::Eof => write!(f, "end of file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValue<'buf> {
    /// `@name` or `@"quoted name"`.
    Global(&'buf str),

    /// `%name` or `%"quoted name"`.
    Local(&'buf str),

    Ident(&'buf str),
    Keyword(Keyword),
    Int(i64),

    /// `#name`, a function attribute.
    Attr(&'buf str),

    /// `!name`, an instruction tag.
    Tag(&'buf str),

    Special(Special),
    Eof,
}

impl TokenValue<'_> {
    pub fn ty(&self) -> TokenType {
        match *self {
            Self::Global(_) => TokenType::Global,
            Self::Local(_) => TokenType::Local,
            Self::Ident(_) => TokenType::Ident,
            Self::Keyword(kw) => TokenType::Keyword(kw),
            Self::Int(_) => TokenType::Int,
            Self::Attr(_) => TokenType::Attr,
            Self::Tag(_) => TokenType::Tag,
            Self::Special(s) => TokenType::Special(s),
            Self::Eof => TokenType::Eof,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Global,
    Declare,
    Define,
    Label,
    To,
    Null,
}

impl Keyword {
    const KEYWORDS: phf::Map<&'static str, Keyword> = phf_map! {
        "global" => Keyword::Global,
        "declare" => Keyword::Declare,
        "define" => Keyword::Define,
        "label" => Keyword::Label,
        "to" => Keyword::To,
        "null" => Keyword::Null,
    };

    pub fn parse(s: &str) -> Option<Keyword> {
        Self::KEYWORDS.get(s).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Declare => "declare",
            Self::Define => "define",
            Self::Label => "label",
            Self::To => "to",
            Self::Null => "null",
        }
    }
}

macro_rules! specials {
    { $( $lit:literal => $variant:ident ),+ $(,)? } => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Special {
            $( $variant, )+
        }

        impl Special {
            const SPECIALS: phf::Map<&'static str, Special> = phf_map! {
                $( $lit => Self::$variant, )+
            };

            fn get_prefix_lengths() -> &'static [usize] {
                static PREFIX_LENGTHS: OnceLock<Vec<usize>> = OnceLock::new();

                PREFIX_LENGTHS.get_or_init(|| {
                    let mut lengths = HashSet::new();
                    $( lengths.insert($lit.len()); )+

                    let mut lengths = lengths.into_iter().collect::<Vec<_>>();
                    // longest match wins
                    lengths.sort_unstable_by(|lhs, rhs| rhs.cmp(lhs));
                    lengths
                })
            }

            /// Tries to parse the beginning of `input` as a special.
            pub fn parse_prefix(input: &str) -> Option<Special> {
                Self::get_prefix_lengths()
                    .iter()
                    .filter_map(|&len| input.get(0..len))
                    .find_map(|prefix| Self::SPECIALS.get(prefix))
                    .copied()
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $lit, )+
                }
            }
        }
    };
}

specials! {
    "(" => ParenLeft,
    ")" => ParenRight,
    "{" => BraceLeft,
    "}" => BraceRight,
    "[" => BracketLeft,
    "]" => BracketRight,
    "," => Comma,
    ":" => Colon,
    "=" => Equals,
    "->" => Arrow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_prefix_prefers_longest() {
        assert_eq!(Special::parse_prefix("-> i64"), Some(Special::Arrow));
        assert_eq!(Special::parse_prefix(", %x"), Some(Special::Comma));
        assert_eq!(Special::parse_prefix("-1"), None);
    }
}
