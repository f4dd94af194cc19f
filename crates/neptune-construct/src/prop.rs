//! Resource property trees.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::token::{LogicalId, Token};

/// A property value of a resource: either a scalar, a token, or a nested
/// list/map. Maps are ordered so rendering is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prop {
    Token(Token),
    Int(i64),
    Bool(bool),
    List(Vec<Prop>),
    Map(BTreeMap<String, Prop>),
}

impl Prop {
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Builds a map from literal entries.
    pub fn object<const N: usize>(entries: [(&str, Prop); N]) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&Prop> {
        match self {
            Self::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Follows a path of map keys.
    pub fn at(&self, path: &[&str]) -> Option<&Prop> {
        path.iter().try_fold(self, |p, key| p.get(key))
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Self::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_token().and_then(Token::as_literal)
    }

    pub fn as_list(&self) -> Option<&[Prop]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Prop>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Prop>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the map stored under `key`, creating it (and replacing any
    /// non-map value) when absent.
    pub fn entry_map(&mut self, key: &str) -> Option<&mut BTreeMap<String, Prop>> {
        let map = self.as_map_mut()?;
        let slot = map.entry(key.to_string()).or_insert_with(Prop::map);
        if !matches!(slot, Prop::Map(_)) {
            *slot = Prop::map();
        }
        slot.as_map_mut()
    }

    /// Returns the list stored under `key`, creating it when absent.
    pub fn entry_list(&mut self, key: &str) -> Option<&mut Vec<Prop>> {
        let map = self.as_map_mut()?;
        let slot = map
            .entry(key.to_string())
            .or_insert_with(|| Prop::List(Vec::new()));
        if !matches!(slot, Prop::List(_)) {
            *slot = Prop::List(Vec::new());
        }
        slot.as_list_mut()
    }

    pub fn collect_references(&self, out: &mut BTreeSet<LogicalId>) {
        match self {
            Self::Token(t) => t.collect_references(out),
            Self::Int(_) | Self::Bool(_) => {}
            Self::List(items) => items.iter().for_each(|p| p.collect_references(out)),
            Self::Map(m) => m.values().for_each(|p| p.collect_references(out)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Token(t) => t.to_json(),
            Self::Int(i) => Value::from(*i),
            Self::Bool(b) => Value::Bool(*b),
            Self::List(items) => Value::Array(items.iter().map(Prop::to_json).collect()),
            Self::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Token> for Prop {
    fn from(value: Token) -> Self {
        Self::Token(value)
    }
}

impl From<&str> for Prop {
    fn from(value: &str) -> Self {
        Self::Token(Token::from(value))
    }
}

impl From<String> for Prop {
    fn from(value: String) -> Self {
        Self::Token(Token::from(value))
    }
}

impl From<i64> for Prop {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Prop {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u16> for Prop {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for Prop {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<Prop>> for Prop {
    fn from(value: Vec<Prop>) -> Self {
        Self::List(value)
    }
}

impl From<Vec<Token>> for Prop {
    fn from(value: Vec<Token>) -> Self {
        Self::List(value.into_iter().map(Prop::Token).collect())
    }
}

impl From<BTreeMap<String, Prop>> for Prop {
    fn from(value: BTreeMap<String, Prop>) -> Self {
        Self::Map(value)
    }
}

impl<const N: usize> From<[(&str, Prop); N]> for Prop {
    fn from(entries: [(&str, Prop); N]) -> Self {
        Self::object(entries)
    }
}
