//! Error types for the synthesizer binary.
//!
//! `AppError` wraps construct failures from `neptune-construct` together with
//! the I/O and serialization errors of writing the cloud assembly.

use std::path::PathBuf;

use neptune_construct::ConstructError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Declaring or synthesizing the stack failed.
    #[error(transparent)]
    Construct(#[from] ConstructError),

    /// Writing the assembly directory failed.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a listing to standard output failed.
    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),

    /// Rendering assembly JSON failed.
    #[error("failed to render assembly: {0}")]
    Json(#[from] serde_json::Error),

    /// The open-ingress topology was requested without the explicit opt-in.
    #[error(
        "legacy variant admits 0.0.0.0/0 on the database port; rerun with --allow-insecure-ingress"
    )]
    InsecureIngress,

    /// A background write task panicked or was cancelled.
    #[error("assembly writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
