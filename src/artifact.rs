use std::{
    env,
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const CONFIG_FILE: &str = "config.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const EVALUATION_FILE: &str = "evaluation.json";
/// The recorder adds its own `.mpk` extension.
pub const MODEL_FILE: &str = "model";
pub const MODEL_FILE_EXTENSION: &str = "mpk";

pub fn model_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join(MODEL_FILE).with_extension(MODEL_FILE_EXTENSION)
}

/// Whether `path` is the artifact directory, lies inside it, or contains it.
/// The artifact directory is wiped before training, so it must not share
/// anything with the inputs.
pub fn overlaps(artifact_dir: &Path, path: &Path) -> bool {
    let artifact_dir = absolute(artifact_dir);
    let path = absolute(path);

    path.starts_with(&artifact_dir) || artifact_dir.starts_with(&path)
}

/// Canonicalizes the longest existing prefix of `path` and appends the rest,
/// so paths that do not exist yet still compare correctly.
fn absolute(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

/// What a trained model needs besides its weights to be used again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub crate_version: String,
    pub class_names: Vec<String>,
    pub image_height: usize,
    pub image_width: usize,
}

impl ArtifactManifest {
    pub fn new(class_names: Vec<String>, image_height: usize, image_width: usize) -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            class_names,
            image_height,
            image_width,
        }
    }

    pub fn is_current_version(&self) -> bool {
        self.crate_version == env!("CARGO_PKG_VERSION")
    }

    pub fn save(&self, artifact_dir: &Path) -> Result<()> {
        let file = File::create(artifact_dir.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(artifact_dir: &Path) -> Result<Self> {
        let file = File::open(artifact_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
