//! Writes the cloud assembly directory.

use std::path::{Path, PathBuf};

use neptune_construct::assembly::AssemblyFile;
use tokio::task::JoinSet;

use crate::error::{AppError, Result};

/// Writes every file into `dir`, creating it if needed. Files are written
/// concurrently; the returned paths follow the input order.
pub async fn write_assembly(dir: &Path, files: Vec<AssemblyFile>) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::io(dir, e))?;

    let paths: Vec<PathBuf> = files.iter().map(|f| dir.join(&f.name)).collect();

    let mut tasks = JoinSet::new();
    for (file, path) in files.into_iter().zip(paths.iter().cloned()) {
        tasks.spawn(async move {
            let bytes = file.contents.len();
            tokio::fs::write(&path, file.contents)
                .await
                .map_err(|e| AppError::io(&path, e))?;
            tracing::debug!(path = %path.display(), bytes, "Wrote assembly file");
            Ok::<_, AppError>(())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    Ok(paths)
}
