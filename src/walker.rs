use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{Dataset, Image, Project};
use crate::fetcher::{FetchOutcome, FilesetFetcher, FilesetLedger};
use crate::remote::Repository;
use crate::report::RunCounters;
use crate::store::MirrorStore;

/// State owned by a single run: handled filesets, totals and failed images.
#[derive(Debug, Default)]
pub struct RunContext {
    pub ledger: FilesetLedger,
    pub counters: RunCounters,
    pub failed_images: Vec<i64>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub dataset_id: i64,
    pub images_downloaded: usize,
    pub images_total: usize,
    pub failed_images: Vec<i64>,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub project_id: i64,
    pub images_downloaded: usize,
    pub datasets_downloaded: usize,
    pub datasets_total: usize,
    pub incomplete_datasets: Vec<i64>,
    pub complete: bool,
}

pub struct HierarchyWalker<'a, R: Repository + ?Sized> {
    store: &'a MirrorStore,
    owner: &'a str,
    fetcher: FilesetFetcher<'a, R>,
    sink: &'a dyn ProgressSink,
}

impl<'a, R: Repository + ?Sized> HierarchyWalker<'a, R> {
    pub fn new(
        store: &'a MirrorStore,
        owner: &'a str,
        fetcher: FilesetFetcher<'a, R>,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            store,
            owner,
            fetcher,
            sink,
        }
    }

    /// Mirrors a single image under its own dataset and project labels.
    /// Returns 1 when the image ended up mirrored, 0 otherwise.
    pub fn process_image(&self, image: &Image, ctx: &mut RunContext) -> usize {
        let project_label = image.project_label();
        let dataset_label = image.dataset_label();
        let Some(dir) = self.dataset_dir(&project_label, &dataset_label) else {
            ctx.failed_images.push(image.id);
            return 0;
        };
        usize::from(self.mirror_image(image, &dir, ctx))
    }

    pub fn process_dataset(
        &self,
        dataset: &Dataset,
        project_label: &str,
        ctx: &mut RunContext,
    ) -> DatasetSummary {
        self.progress(format!(
            "phase=Dataset; {} ({} images)",
            dataset.label(),
            dataset.images.len()
        ));
        let images_total = dataset.images.len();
        let Some(dir) = self.dataset_dir(project_label, &dataset.label()) else {
            let failed_images: Vec<i64> = dataset.images.iter().map(|image| image.id).collect();
            ctx.failed_images.extend(&failed_images);
            return DatasetSummary {
                dataset_id: dataset.id,
                images_downloaded: 0,
                images_total,
                failed_images,
                complete: false,
            };
        };

        let mut downloaded = Vec::new();
        let mut failed_images = Vec::new();
        for image in &dataset.images {
            if self.mirror_image(image, &dir, ctx) {
                downloaded.push(image.id);
            } else {
                failed_images.push(image.id);
            }
        }

        let complete = failed_images.is_empty() && downloaded.len() == images_total;
        DatasetSummary {
            dataset_id: dataset.id,
            images_downloaded: downloaded.len(),
            images_total,
            failed_images,
            complete,
        }
    }

    pub fn process_project(&self, project: &Project, ctx: &mut RunContext) -> ProjectSummary {
        self.progress(format!(
            "phase=Project; {} ({} datasets)",
            project.label(),
            project.datasets.len()
        ));
        let project_label = project.label();
        let mut images_downloaded = 0;
        let mut complete_datasets = Vec::new();
        let mut incomplete_datasets = Vec::new();
        for dataset in &project.datasets {
            let summary = self.process_dataset(dataset, &project_label, ctx);
            images_downloaded += summary.images_downloaded;
            if summary.complete {
                complete_datasets.push(dataset.id);
            } else {
                incomplete_datasets.push(dataset.id);
            }
        }

        let datasets_total = project.datasets.len();
        ProjectSummary {
            project_id: project.id,
            images_downloaded,
            datasets_downloaded: complete_datasets.len(),
            datasets_total,
            complete: incomplete_datasets.is_empty() && complete_datasets.len() == datasets_total,
            incomplete_datasets,
        }
    }

    fn dataset_dir(&self, project_label: &str, dataset_label: &str) -> Option<Utf8PathBuf> {
        match self
            .store
            .ensure_dataset_dir(self.owner, project_label, dataset_label)
        {
            Ok(dir) => Some(dir),
            Err(err) => {
                tracing::warn!(
                    project = project_label,
                    dataset = dataset_label,
                    error = %err,
                    "destination directory unavailable"
                );
                None
            }
        }
    }

    fn mirror_image(&self, image: &Image, dir: &Utf8Path, ctx: &mut RunContext) -> bool {
        let outcome = self.fetcher.fetch(image, dir, &mut ctx.ledger, self.sink);
        if let FetchOutcome::Failed { reason } = &outcome {
            tracing::info!(image = image.id, reason = %reason, "image not mirrored");
        }
        let succeeded = outcome.is_success();
        if !succeeded {
            ctx.failed_images.push(image.id);
        }
        succeeded
    }

    fn progress(&self, message: String) {
        self.sink.event(ProgressEvent {
            message,
            elapsed: None,
        });
    }
}
