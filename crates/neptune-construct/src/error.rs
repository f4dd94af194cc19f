//! Construct-layer error types.
//!
//! `ConstructError` covers everything that can go wrong while declaring
//! resources or synthesizing a stack. The binary crate wraps it in its own
//! error type together with I/O failures.

use std::path::PathBuf;

/// Error raised by construct declaration, validation or synthesis.
#[derive(Debug, thiserror::Error)]
pub enum ConstructError {
    /// Construct id is empty or contains characters that cannot appear in a path.
    #[error("invalid construct id '{0}'")]
    InvalidId(String),

    /// Two constructs in the same stack resolved to the same path.
    #[error("there is already a construct with id '{0}' in this stack")]
    DuplicateId(String),

    /// A resource property value is out of range or malformed.
    #[error("invalid value for {property}: {reason}")]
    InvalidProperty { property: String, reason: String },

    /// A token references a logical ID that is not declared in the stack.
    #[error("resource '{from}' references unknown resource '{to}'")]
    DanglingReference { from: String, to: String },

    /// Resource references form a cycle; the members are listed in path order.
    #[error("dependency cycle between resources: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Asset path missing or unreadable.
    #[error("asset {}: {reason}", path.display())]
    Asset { path: PathBuf, reason: String },

    /// Lambda handler module not present in the code bundle.
    #[error("handler '{handler}' not found in {}", path.display())]
    MissingHandler { handler: String, path: PathBuf },

    /// GraphQL schema file failed to parse.
    #[error("invalid GraphQL schema: {0}")]
    Schema(String),

    /// Resolver targets a field the schema does not declare.
    #[error("schema has no field {type_name}.{field_name}")]
    UnknownField {
        type_name: String,
        field_name: String,
    },

    /// Resolver for a type/field pair already exists on the API.
    #[error("resolver for {type_name}.{field_name} already exists")]
    DuplicateResolver {
        type_name: String,
        field_name: String,
    },

    /// Filesystem error while reading an asset.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConstructError {
    pub(crate) fn invalid(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            property: property.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = ConstructError> = std::result::Result<T, E>;
