//! File assets staged to the bootstrap bucket.
//!
//! An asset is fingerprinted by content: the SHA-256 of every file under the
//! source path, in sorted relative-path order. The fingerprint names the
//! object in the bucket, so unchanged code never triggers an update.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use crate::assembly;
use crate::error::{ConstructError, Result};
use crate::token::Token;

/// How the asset is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// A directory, zipped before upload.
    ZipDirectory,
    /// A single file, uploaded as-is.
    File,
}

impl Packaging {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ZipDirectory => "zip",
            Self::File => "file",
        }
    }
}

/// A local file or directory to be published with the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsset {
    source: PathBuf,
    hash: String,
    packaging: Packaging,
}

/// Where a published asset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    pub bucket: Token,
    pub object_key: String,
}

impl FileAsset {
    /// Fingerprints a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(ConstructError::Asset {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let files = collect_files(path)?;

        let mut hasher = Sha256::new();
        for rel in &files {
            let file = path.join(rel);
            let bytes = fs::read(&file).map_err(|e| ConstructError::io(&file, e))?;
            hasher.update(rel.to_string_lossy().replace('\\', "/").as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(&bytes);
        }

        tracing::debug!(
            path = %path.display(),
            files = files.len(),
            "Fingerprinted directory asset",
        );

        Ok(Self {
            source: path.to_path_buf(),
            hash: hex::encode(hasher.finalize()),
            packaging: Packaging::ZipDirectory,
        })
    }

    /// Fingerprints a single file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ConstructError::Asset {
                path: path.to_path_buf(),
                reason: "not a file".to_string(),
            });
        }
        let bytes = fs::read(path).map_err(|e| ConstructError::io(path, e))?;
        Ok(Self {
            source: path.to_path_buf(),
            hash: hex::encode(Sha256::digest(&bytes)),
            packaging: Packaging::File,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn packaging(&self) -> Packaging {
        self.packaging
    }

    /// Object key in the bootstrap bucket.
    pub fn object_key(&self) -> String {
        match self.packaging {
            Packaging::ZipDirectory => format!("{}.zip", self.hash),
            Packaging::File => self.hash.clone(),
        }
    }

    pub fn location(&self) -> AssetLocation {
        AssetLocation {
            bucket: assembly::assets_bucket(),
            object_key: self.object_key(),
        }
    }
}

/// Relative paths of every file under `root`. Hidden files and ignore rules
/// are not filtered, so they count toward the fingerprint. Symlinked files are
/// read through; symlinked directories are not descended into.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut out = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| ConstructError::Asset {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        let is_file = file_type.is_file() || (file_type.is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_hash_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "exports.handler = 1;").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/util.js"), "x").unwrap();

        let first = FileAsset::from_directory(dir.path()).unwrap();
        let again = FileAsset::from_directory(dir.path()).unwrap();
        assert_eq!(first.hash(), again.hash());
        assert_eq!(first.object_key(), format!("{}.zip", first.hash()));

        fs::write(dir.path().join("lib/util.js"), "y").unwrap();
        let changed = FileAsset::from_directory(dir.path()).unwrap();
        assert_ne!(first.hash(), changed.hash());
    }

    #[test]
    fn hidden_files_count_and_ignore_rules_do_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "exports.handler = 1;").unwrap();
        let before = FileAsset::from_directory(dir.path()).unwrap();

        fs::write(dir.path().join(".gitignore"), "*.js\n").unwrap();
        fs::write(dir.path().join(".env"), "A=1").unwrap();
        let files = collect_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from(".env"), PathBuf::from(".gitignore"), PathBuf::from("main.js")]
        );
        assert_ne!(FileAsset::from_directory(dir.path()).unwrap().hash(), before.hash());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_cycle_is_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "exports.handler = 1;").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let asset = FileAsset::from_directory(dir.path()).unwrap();
        assert_eq!(collect_files(dir.path()).unwrap(), vec![PathBuf::from("main.js")]);
        assert_eq!(asset.packaging(), Packaging::ZipDirectory);
    }

    #[test]
    fn missing_directory_is_an_asset_error() {
        let err = FileAsset::from_directory(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ConstructError::Asset { .. }));
    }

    #[test]
    fn file_asset_key_is_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("schema.graphql");
        fs::write(&file, "type Query { a: Int }").unwrap();
        let asset = FileAsset::from_file(&file).unwrap();
        assert_eq!(asset.packaging(), Packaging::File);
        assert_eq!(asset.object_key(), asset.hash());
    }
}
