use std::collections::HashMap;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{Fileset, Image, RemoteFile};
use crate::error::MirrorError;
use crate::remote::Repository;
use crate::store::MirrorStore;

/// How fetched files are laid out below a dataset directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `Fileset_<id>/` subfolder per fileset, fetched once per run.
    #[default]
    Fileset,
    /// Files directly in the dataset directory, skipped one by one.
    Flat,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Fileset => write!(f, "fileset"),
            Layout::Flat => write!(f, "flat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { fileset_id: i64, files: usize },
    AlreadyPresent { fileset_id: i64 },
    /// The fileset was handled earlier in the run through another image.
    Shared { fileset_id: i64, succeeded: bool },
    Failed { reason: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            FetchOutcome::Downloaded { .. } | FetchOutcome::AlreadyPresent { .. } => true,
            FetchOutcome::Shared { succeeded, .. } => *succeeded,
            FetchOutcome::Failed { .. } => false,
        }
    }
}

/// Filesets handled during one run, with whether their fetch succeeded.
#[derive(Debug, Default)]
pub struct FilesetLedger {
    handled: HashMap<i64, bool>,
}

impl FilesetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome(&self, fileset_id: i64) -> Option<bool> {
        self.handled.get(&fileset_id).copied()
    }

    pub fn record(&mut self, fileset_id: i64, succeeded: bool) {
        self.handled.entry(fileset_id).or_insert(succeeded);
    }

    pub fn len(&self) -> usize {
        self.handled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handled.is_empty()
    }
}

pub struct FilesetFetcher<'a, R: Repository + ?Sized> {
    repo: &'a R,
    layout: Layout,
    overwrite: bool,
}

impl<'a, R: Repository + ?Sized> FilesetFetcher<'a, R> {
    pub fn new(repo: &'a R, layout: Layout, overwrite: bool) -> Self {
        Self {
            repo,
            layout,
            overwrite,
        }
    }

    /// Fetches the fileset owned by `image` below `dataset_dir`.
    ///
    /// Never returns an error: every failure becomes [`FetchOutcome::Failed`].
    pub fn fetch(
        &self,
        image: &Image,
        dataset_dir: &Utf8Path,
        ledger: &mut FilesetLedger,
        sink: &dyn ProgressSink,
    ) -> FetchOutcome {
        let Some(fileset) = image.fileset.as_ref() else {
            let err = MirrorError::MissingFileset(image.id);
            tracing::warn!(image = image.id, "no original file(s) found");
            emit(sink, format!("ERROR: no original file(s) for [{}] found!", image.id));
            return FetchOutcome::Failed {
                reason: err.to_string(),
            };
        };

        match self.layout {
            Layout::Fileset => self.fetch_grouped(fileset, dataset_dir, ledger, sink),
            Layout::Flat => match self.fetch_flat(fileset, dataset_dir, sink) {
                Ok(outcome) => outcome,
                Err(err) => failed(fileset.id, dataset_dir, err),
            },
        }
    }

    fn fetch_grouped(
        &self,
        fileset: &Fileset,
        dataset_dir: &Utf8Path,
        ledger: &mut FilesetLedger,
        sink: &dyn ProgressSink,
    ) -> FetchOutcome {
        if let Some(succeeded) = ledger.outcome(fileset.id) {
            tracing::debug!(fileset = fileset.id, succeeded, "fileset already handled in this run");
            emit(sink, format!("INFO: Fileset_{} already handled in this run", fileset.id));
            return FetchOutcome::Shared {
                fileset_id: fileset.id,
                succeeded,
            };
        }

        let dir = MirrorStore::fileset_path(dataset_dir, fileset.id);
        let result = self.download_into(fileset, &dir, sink);
        ledger.record(fileset.id, result.is_ok());
        match result {
            Ok(outcome) => outcome,
            Err(err) => failed(fileset.id, &dir, err),
        }
    }

    fn download_into(
        &self,
        fileset: &Fileset,
        dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, MirrorError> {
        if MirrorStore::has_content(dir) {
            if !self.overwrite {
                emit(sink, format!("INFO: Fileset_{} already exists in {dir}", fileset.id));
                return Ok(FetchOutcome::AlreadyPresent {
                    fileset_id: fileset.id,
                });
            }
            tracing::info!(fileset = fileset.id, path = %dir, "clearing fileset before overwrite");
            MirrorStore::clear_dir_contents(dir)?;
        }
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("create {dir}: {err}")))?;

        for file in &fileset.files {
            let target = target_path(fileset.id, file, dir)?;
            self.fetch_one(file, &target, sink)?;
        }
        Ok(FetchOutcome::Downloaded {
            fileset_id: fileset.id,
            files: fileset.files.len(),
        })
    }

    fn fetch_flat(
        &self,
        fileset: &Fileset,
        dataset_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, MirrorError> {
        let mut pending = Vec::new();
        for file in &fileset.files {
            let target = target_path(fileset.id, file, dataset_dir)?;
            if self.overwrite || !target.exists() {
                pending.push((file, target));
            } else {
                emit(sink, format!("INFO: {} already exists in {dataset_dir}", file.name));
            }
        }

        if pending.is_empty() {
            return Ok(FetchOutcome::AlreadyPresent {
                fileset_id: fileset.id,
            });
        }
        let files = pending.len();
        for (file, target) in pending {
            self.fetch_one(file, &target, sink)?;
        }
        Ok(FetchOutcome::Downloaded {
            fileset_id: fileset.id,
            files,
        })
    }

    fn fetch_one(
        &self,
        file: &RemoteFile,
        target: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<(), MirrorError> {
        emit(sink, format!("Downloading original file [{}] to [{target}]...", file.id));
        self.repo.fetch_file(file, target)?;
        emit(sink, format!("SUCCESS: ID {} downloaded as '{}'", file.id, file.name));
        Ok(())
    }
}

fn target_path(
    fileset_id: i64,
    file: &RemoteFile,
    dir: &Utf8Path,
) -> Result<Utf8PathBuf, MirrorError> {
    Utf8Path::new(&file.name)
        .file_name()
        .map(|name| dir.join(name))
        .ok_or_else(|| MirrorError::InvalidFileName {
            fileset: fileset_id,
            name: file.name.clone(),
        })
}

fn failed(fileset_id: i64, path: &Utf8Path, err: MirrorError) -> FetchOutcome {
    tracing::warn!(fileset = fileset_id, path = %path, error = %err, "fileset download failed");
    FetchOutcome::Failed {
        reason: err.to_string(),
    }
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}
