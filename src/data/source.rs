use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{Error, Result};

/// Turns a dataset path into a directory whose subdirectories are the classes.
///
/// A `.zip` archive is extracted into `extract_dir` first. When the archive
/// wraps everything in a single folder, that folder becomes the data root.
pub fn resolve(path: &Path, extract_dir: &Path) -> Result<PathBuf> {
    let data_dir = if is_zip(path) {
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }

        extract(path, extract_dir)?;
        unwrap_single_root(extract_dir)?
    } else {
        path.to_path_buf()
    };

    if !data_dir.is_dir() {
        return Err(Error::NotFound(data_dir));
    }

    Ok(data_dir)
}

pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("zip"))
}

fn extract(archive_path: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    fs::create_dir_all(target)?;
    archive.extract(target)?;

    info!(
        archive = %archive_path.display(),
        entries = archive.len(),
        target = %target.display(),
        "Extracted dataset archive"
    );

    Ok(())
}

fn unwrap_single_root(dir: &Path) -> Result<PathBuf> {
    let entries = visible_entries(dir)?;

    if let [only] = entries.as_slice() {
        if only.is_dir() && !subdirectories(only)?.is_empty() {
            debug!(root = %only.display(), "Using wrapping folder as data root");
            return Ok(only.clone());
        }
    }

    Ok(dir.to_path_buf())
}

/// Every visible subdirectory of `dir` is a class, sorted by name so label
/// indices are stable across runs.
pub fn discover_classes(dir: &Path) -> Result<Vec<String>> {
    let mut classes: Vec<String> = subdirectories(dir)?
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    if classes.is_empty() {
        return Err(Error::dataset(format!(
            "no class directories found in {}",
            dir.display()
        )));
    }

    classes.sort();
    Ok(classes)
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(visible_entries(dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect())
}

fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') || name == "__MACOSX" {
            continue;
        }

        entries.push(entry.path());
    }

    Ok(entries)
}
