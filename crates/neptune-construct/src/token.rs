//! Deferred values.
//!
//! A `Token` stands for a value that is only known once the stack is
//! deployed: a resource's `Ref`, one of its attributes, or a string built
//! from them. Tokens are rendered into CloudFormation intrinsic functions at
//! synthesis time and never interpolated eagerly, so a resource may be handed
//! a value belonging to a resource declared after it.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};

/// Logical ID of a resource inside a template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub(crate) fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for LogicalId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// CloudFormation pseudo parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pseudo {
    AccountId,
    Region,
    Partition,
    StackName,
    UrlSuffix,
}

impl Pseudo {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Region => "AWS::Region",
            Self::Partition => "AWS::Partition",
            Self::StackName => "AWS::StackName",
            Self::UrlSuffix => "AWS::URLSuffix",
        }
    }
}

/// A value that may not be known until deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Plain string known at synthesis time.
    Literal(String),
    /// `{ "Ref": id }`
    Ref(LogicalId),
    /// `{ "Ref": "AWS::..." }`
    Pseudo(Pseudo),
    /// `{ "Fn::GetAtt": [id, attribute] }`
    GetAtt { id: LogicalId, attribute: String },
    /// `{ "Fn::Join": [separator, parts] }`
    Join { separator: String, parts: Vec<Token> },
    /// `{ "Fn::Sub": template }`; `${Name}` placeholders may name resources.
    Sub(String),
    /// `{ "Fn::Select": [index, list] }`
    Select { index: usize, list: Box<Token> },
    /// `{ "Fn::GetAZs": "" }` for the stack's region.
    GetAzs,
}

impl Token {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(id: &LogicalId) -> Self {
        Self::Ref(id.clone())
    }

    pub fn get_att(id: &LogicalId, attribute: &str) -> Self {
        Self::GetAtt {
            id: id.clone(),
            attribute: attribute.to_string(),
        }
    }

    pub fn join(separator: &str, parts: Vec<Token>) -> Self {
        Self::Join {
            separator: separator.to_string(),
            parts,
        }
    }

    /// Concatenates parts with no separator.
    pub fn concat(parts: Vec<Token>) -> Self {
        Self::join("", parts)
    }

    pub fn sub(template: impl Into<String>) -> Self {
        Self::Sub(template.into())
    }

    pub fn select(index: usize, list: Token) -> Self {
        Self::Select {
            index,
            list: Box::new(list),
        }
    }

    /// Returns the string if the token is fully known at synthesis time.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(s) => Some(s),
            _ => None,
        }
    }

    /// Whether any part of this token is deferred to deploy time.
    pub fn is_unresolved(&self) -> bool {
        match self {
            Self::Literal(_) => false,
            Self::Join { parts, .. } => parts.iter().any(Token::is_unresolved),
            _ => true,
        }
    }

    /// Collects the logical IDs this token depends on.
    pub fn collect_references(&self, out: &mut BTreeSet<LogicalId>) {
        match self {
            Self::Literal(_) | Self::Pseudo(_) | Self::GetAzs => {}
            Self::Ref(id) | Self::GetAtt { id, .. } => {
                out.insert(id.clone());
            }
            Self::Join { parts, .. } => parts.iter().for_each(|p| p.collect_references(out)),
            Self::Sub(template) => {
                out.extend(sub_placeholders(template).map(|name| LogicalId::new(name.to_string())));
            }
            Self::Select { list, .. } => list.collect_references(out),
        }
    }

    pub fn references(&self) -> BTreeSet<LogicalId> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    /// Renders the token in CloudFormation template form.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Literal(s) => Value::String(s.clone()),
            Self::Ref(id) => json!({ "Ref": id.as_str() }),
            Self::Pseudo(p) => json!({ "Ref": p.as_str() }),
            Self::GetAtt { id, attribute } => json!({ "Fn::GetAtt": [id.as_str(), attribute] }),
            Self::Join { separator, parts } => render_join(separator, parts),
            Self::Sub(template) => json!({ "Fn::Sub": template }),
            Self::Select { index, list } => json!({ "Fn::Select": [index, list.to_json()] }),
            Self::GetAzs => json!({ "Fn::GetAZs": "" }),
        }
    }
}

/// Merges adjacent literal parts; a join made only of literals collapses
/// to a plain string.
fn render_join(separator: &str, parts: &[Token]) -> Value {
    if parts.iter().all(|p| p.as_literal().is_some()) {
        let joined: Vec<&str> = parts.iter().filter_map(Token::as_literal).collect();
        return Value::String(joined.join(separator));
    }

    let mut rendered: Vec<Value> = Vec::with_capacity(parts.len());
    for part in parts {
        match (part.as_literal(), rendered.last_mut()) {
            (Some(lit), Some(Value::String(prev))) if separator.is_empty() => prev.push_str(lit),
            _ => rendered.push(part.to_json()),
        }
    }
    json!({ "Fn::Join": [separator, rendered] })
}

/// Yields resource names referenced by `${Name}` / `${Name.Attr}`
/// placeholders. Pseudo parameters and `${!Literal}` escapes are skipped.
fn sub_placeholders(template: &str) -> impl Iterator<Item = &str> {
    template
        .split("${")
        .skip(1)
        .filter_map(|rest| rest.split_once('}').map(|(name, _)| name))
        .filter(|name| !name.starts_with('!') && !name.starts_with("AWS::"))
        .map(|name| name.split_once('.').map_or(name, |(res, _)| res))
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<Pseudo> for Token {
    fn from(value: Pseudo) -> Self {
        Self::Pseudo(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Ref(id) => write!(f, "${{Ref:{id}}}"),
            Self::Pseudo(p) => write!(f, "${{{}}}", p.as_str()),
            Self::GetAtt { id, attribute } => write!(f, "${{{id}.{attribute}}}"),
            Self::Join { separator, parts } => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(separator)?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Self::Sub(template) => f.write_str(template),
            Self::Select { index, list } => write!(f, "${{Select:{index}:{list}}}"),
            Self::GetAzs => f.write_str("${GetAZs}"),
        }
    }
}
