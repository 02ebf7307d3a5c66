#![allow(dead_code)]

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use selsan::parse::Cursor;

/// Reads the YAML test configuration from the comment block at the top of a
/// source file:
///
/// ```text
/// ; test:
/// ;   fail: true
/// ```
pub fn parse_comment_header<T: DeserializeOwned + Default>(source: &str) -> T {
    let mut cursor = Cursor::new(source);

    if cursor.consume_expecting("; test:").is_none() {
        return Default::default();
    }

    assert!(
        cursor.consume_line().trim().is_empty(),
        "first line must only contain `; test:`"
    );

    let mut header = String::new();

    while cursor.consume_expecting(";").is_some() {
        let line = cursor.consume_line();
        header.push_str(line.strip_prefix(' ').unwrap_or(line));
        header.push('\n');
    }

    match serde_yaml::from_str(&header) {
        Ok(result) => result,
        Err(e) => panic!("Header is invalid: {e}"),
    }
}

fn deserialize_regex<'de, D>(de: D) -> Result<Regex, D::Error>
where
    D: Deserializer<'de>,
{
    Regex::new(Deserialize::deserialize(de)?).map_err(|e| <D::Error as serde::de::Error>::custom(e))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub enum Matcher {
    Contains(String),

    #[serde(deserialize_with = "deserialize_regex")]
    Regex(Regex),

    Verbatim(String),
}

impl Matcher {
    pub fn check(&self, s: &str) -> Result<(), String> {
        match self {
            Self::Contains(substr) if s.contains(substr) => Ok(()),
            Self::Contains(substr) => Err(format!("expected to contain `{substr}`")),

            Self::Regex(r) if r.is_match(s) => Ok(()),
            Self::Regex(r) => Err(format!("expected to match regexp `{r}`")),

            Self::Verbatim(expected) if s == expected => Ok(()),
            Self::Verbatim(expected) => Err(format!("expected to equal `{expected}`")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum Matchers {
    One(Matcher),
    Many(Vec<Matcher>),
}

impl Matchers {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(_) => false,
            Self::Many(v) => v.is_empty(),
        }
    }

    pub fn as_slice(&self) -> &[Matcher] {
        match self {
            Self::One(matcher) => std::slice::from_ref(matcher),
            Self::Many(matchers) => matchers,
        }
    }

    pub fn check(&self, s: &str) -> Result<(), String> {
        self.as_slice()
            .iter()
            .map(|matcher| matcher.check(s))
            .collect()
    }
}

impl Default for Matchers {
    fn default() -> Self {
        Self::Many(vec![])
    }
}
