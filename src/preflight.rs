//! Checks the runtime prerequisites before any heavy work starts.

use std::{
    fmt,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use tracing::{info, warn};
use zip::ZipArchive;

use crate::{
    artifact::{self, model_path, ArtifactManifest, CONFIG_FILE, MANIFEST_FILE},
    backend::ComputeBackend,
    data::source,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Mandatory,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Passed,
    Warning,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: &'static str,
    pub severity: Severity,
    pub status: Status,
    pub detail: String,
    pub hint: Option<String>,
}

impl Check {
    fn passed(name: &'static str, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            name,
            severity,
            status: Status::Passed,
            detail: detail.into(),
            hint: None,
        }
    }

    fn failed(
        name: &'static str,
        severity: Severity,
        detail: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        let status = match severity {
            Severity::Mandatory => Status::Missing,
            Severity::Advisory => Status::Warning,
        };

        Self {
            name,
            severity,
            status,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }
}

#[derive(Debug, Clone)]
enum Requirement {
    Dataset(PathBuf),
    /// The directory plus the inputs that must stay outside of it.
    ArtifactDir(PathBuf, Vec<PathBuf>),
    Backend(ComputeBackend),
    ModelArtifact(PathBuf),
    ArtifactVersion(PathBuf),
}

impl Requirement {
    fn check(&self) -> Check {
        match self {
            Self::Dataset(path) => check_dataset(path),
            Self::ArtifactDir(path, inputs) => check_artifact_dir(path, inputs),
            Self::Backend(backend) => check_backend(*backend),
            Self::ModelArtifact(path) => check_model_artifact(path),
            Self::ArtifactVersion(path) => check_artifact_version(path),
        }
    }
}

pub struct Preflight {
    requirements: Vec<Requirement>,
}

impl Preflight {
    pub fn for_training(data_path: &Path, artifact_dir: &Path, backend: ComputeBackend) -> Self {
        Self {
            requirements: vec![
                Requirement::Dataset(data_path.to_path_buf()),
                Requirement::ArtifactDir(
                    artifact_dir.to_path_buf(),
                    vec![data_path.to_path_buf()],
                ),
                Requirement::Backend(backend),
            ],
        }
    }

    /// Also keeps the zip extraction directory out of the artifact directory.
    pub fn with_extract_dir(mut self, extract_dir: &Path) -> Self {
        for requirement in &mut self.requirements {
            if let Requirement::ArtifactDir(_, inputs) = requirement {
                inputs.push(extract_dir.to_path_buf());
            }
        }
        self
    }

    pub fn for_inference(artifact_dir: &Path, backend: ComputeBackend) -> Self {
        Self {
            requirements: vec![
                Requirement::ModelArtifact(artifact_dir.to_path_buf()),
                Requirement::ArtifactVersion(artifact_dir.to_path_buf()),
                Requirement::Backend(backend),
            ],
        }
    }

    pub fn run(&self) -> PreflightReport {
        let checks = self.requirements.iter().map(Requirement::check).collect();
        let report = PreflightReport { checks };
        report.log();
        report
    }
}

#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub checks: Vec<Check>,
}

impl PreflightReport {
    pub fn missing(&self) -> impl Iterator<Item = &Check> {
        self.checks
            .iter()
            .filter(|check| check.status == Status::Missing)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Check> {
        self.checks
            .iter()
            .filter(|check| check.status == Status::Warning)
    }

    pub fn is_ok(&self) -> bool {
        self.missing().next().is_none()
    }

    pub fn ensure(&self) -> Result<()> {
        let missing: Vec<String> = self
            .missing()
            .map(|check| match &check.hint {
                Some(hint) => format!("{} ({}; {})", check.name, check.detail, hint),
                None => format!("{} ({})", check.name, check.detail),
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingRequirements(missing))
        }
    }

    fn log(&self) {
        for check in &self.checks {
            match check.status {
                Status::Passed => info!(check = check.name, "{}", check.detail),
                Status::Warning | Status::Missing => warn!(
                    check = check.name,
                    hint = check.hint.as_deref().unwrap_or_default(),
                    "{}",
                    check.detail
                ),
            }
        }
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let marker = match check.status {
                Status::Passed => "ok",
                Status::Warning => "warn",
                Status::Missing => "MISSING",
            };
            writeln!(f, "[{marker:>7}] {}: {}", check.name, check.detail)?;
            if let (Some(hint), false) = (&check.hint, check.status == Status::Passed) {
                writeln!(f, "          {hint}")?;
            }
        }
        Ok(())
    }
}

fn check_dataset(path: &Path) -> Check {
    const NAME: &str = "dataset";
    let severity = Severity::Mandatory;

    if !path.exists() {
        return Check::failed(
            NAME,
            severity,
            format!("{} does not exist", path.display()),
            "pass a zip archive or a directory with one subdirectory per class",
        );
    }

    if source::is_zip(path) {
        let archive = File::open(path)
            .map_err(Error::from)
            .and_then(|file| Ok(ZipArchive::new(BufReader::new(file))?));

        return match archive {
            Ok(archive) => Check::passed(
                NAME,
                severity,
                format!("zip archive {} with {} entries", path.display(), archive.len()),
            ),
            Err(err) => Check::failed(
                NAME,
                severity,
                format!("{} is not a readable zip archive: {err}", path.display()),
                "re-create the archive",
            ),
        };
    }

    if !path.is_dir() {
        return Check::failed(
            NAME,
            severity,
            format!("{} is neither a zip archive nor a directory", path.display()),
            "pass a zip archive or a directory with one subdirectory per class",
        );
    }

    match source::discover_classes(path) {
        Ok(classes) => Check::passed(
            NAME,
            severity,
            format!("{} with {} classes", path.display(), classes.len()),
        ),
        Err(err) => Check::failed(
            NAME,
            severity,
            err.to_string(),
            "create one subdirectory per class holding its images",
        ),
    }
}

fn check_artifact_dir(path: &Path, inputs: &[PathBuf]) -> Check {
    const NAME: &str = "artifact-dir";
    let severity = Severity::Mandatory;

    if let Some(input) = inputs.iter().find(|input| artifact::overlaps(path, input)) {
        return Check::failed(
            NAME,
            severity,
            format!(
                "{} overlaps {}, which training would delete",
                path.display(),
                input.display()
            ),
            "choose an --artifact-dir outside the dataset",
        );
    }

    let existing = path.ancestors().find(|ancestor| ancestor.exists());
    let Some(existing) = existing else {
        // Relative paths resolve against the working directory.
        return Check::passed(NAME, severity, format!("{} will be created", path.display()));
    };

    match fs::metadata(existing) {
        Ok(metadata) if !metadata.is_dir() => Check::failed(
            NAME,
            severity,
            format!("{} is not a directory", existing.display()),
            "choose another --artifact-dir",
        ),
        Ok(metadata) if metadata.permissions().readonly() => Check::failed(
            NAME,
            severity,
            format!("{} is read-only", existing.display()),
            "choose a writable --artifact-dir",
        ),
        Ok(_) => Check::passed(NAME, severity, format!("{} is writable", path.display())),
        Err(err) => Check::failed(
            NAME,
            severity,
            format!("cannot inspect {}: {err}", existing.display()),
            "choose another --artifact-dir",
        ),
    }
}

fn check_backend(backend: ComputeBackend) -> Check {
    const NAME: &str = "compute-backend";

    if backend.is_gpu() {
        Check::passed(NAME, Severity::Advisory, "GPU backend (wgpu) selected for training")
    } else {
        Check::failed(
            NAME,
            Severity::Advisory,
            "No GPU backend selected, using CPU (ndarray)",
            "pass --backend wgpu to train on the GPU",
        )
    }
}

fn check_model_artifact(artifact_dir: &Path) -> Check {
    const NAME: &str = "model-artifact";

    let missing: Vec<String> = [
        artifact_dir.join(CONFIG_FILE),
        artifact_dir.join(MANIFEST_FILE),
        model_path(artifact_dir),
    ]
    .into_iter()
    .filter(|path| !path.is_file())
    .map(|path| path.display().to_string())
    .collect();

    if missing.is_empty() {
        Check::passed(
            NAME,
            Severity::Mandatory,
            format!("trained model in {}", artifact_dir.display()),
        )
    } else {
        Check::failed(
            NAME,
            Severity::Mandatory,
            format!("missing {}", missing.join(", ")),
            "run `waste-classifier train` first",
        )
    }
}

fn check_artifact_version(artifact_dir: &Path) -> Check {
    const NAME: &str = "artifact-version";

    match ArtifactManifest::load(artifact_dir) {
        Ok(manifest) if manifest.is_current_version() => Check::passed(
            NAME,
            Severity::Advisory,
            format!("built by version {}", manifest.crate_version),
        ),
        Ok(manifest) => Check::failed(
            NAME,
            Severity::Advisory,
            format!(
                "built by version {}, but version {} is running",
                manifest.crate_version,
                env!("CARGO_PKG_VERSION")
            ),
            "retrain if loading fails",
        ),
        Err(err) => Check::failed(
            NAME,
            Severity::Advisory,
            format!("cannot read manifest: {err}"),
            "retrain the model",
        ),
    }
}
