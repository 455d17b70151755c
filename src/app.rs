use std::time::{Duration, Instant};

use crate::domain::{GroupScope, ObjectId, ObjectKind, RemoteObject};
use crate::fetcher::{FilesetFetcher, Layout};
use crate::remote::Repository;
use crate::report::{
    MISSING_ROOT_MESSAGE, RunCounters, RunReport, RunReporter, RunStatus, UNKNOWN_OWNER_MESSAGE,
};
use crate::store::MirrorStore;
use crate::walker::{HierarchyWalker, RunContext};

pub const DEFAULT_ACCOUNT_URL: &str = "https://hrm-biop.epfl.ch/";

#[derive(Debug, Clone)]
pub struct RunParams {
    pub kind: ObjectKind,
    pub ids: Vec<String>,
    pub overwrite: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<R: Repository> {
    store: MirrorStore,
    repo: R,
    layout: Layout,
    account_url: String,
}

impl<R: Repository> App<R> {
    pub fn new(store: MirrorStore, repo: R) -> Self {
        Self {
            store,
            repo,
            layout: Layout::default(),
            account_url: DEFAULT_ACCOUNT_URL.to_string(),
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_account_url(mut self, account_url: impl Into<String>) -> Self {
        self.account_url = account_url.into();
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    /// Mirrors every requested object and reports the totals.
    ///
    /// The run is refused without touching the filesystem when the mount root
    /// is missing, the user cannot be resolved, or the user has neither a
    /// folder on the share nor admin rights.
    pub fn run(&self, params: &RunParams, sink: &dyn ProgressSink) -> RunReport {
        if !self.store.mount_root_exists() {
            tracing::warn!(root = %self.store.mount_root(), "mount root missing");
            return RunReport::refused(
                RunStatus::MissingMountRoot,
                None,
                MISSING_ROOT_MESSAGE.to_string(),
            );
        }

        let user = match self.repo.current_user() {
            Ok(user) if !user.name.is_empty() => user,
            Ok(_) => {
                tracing::warn!("current user has an empty name");
                return RunReport::refused(
                    RunStatus::UnknownOwner,
                    None,
                    UNKNOWN_OWNER_MESSAGE.to_string(),
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "unable to resolve current user");
                return RunReport::refused(
                    RunStatus::UnknownOwner,
                    None,
                    UNKNOWN_OWNER_MESSAGE.to_string(),
                );
            }
        };

        let owner_root = self.store.owner_root(&user.name);
        if !owner_root.is_dir() && !user.is_admin {
            tracing::warn!(owner = %user.name, path = %owner_root, "no HRM account folder");
            return RunReport::refused(
                RunStatus::InactiveAccount,
                Some(user.name.clone()),
                RunReporter::inactive_account(&user.name, &self.account_url),
            );
        }

        let start = Instant::now();
        let fetcher = FilesetFetcher::new(&self.repo, self.layout, params.overwrite);
        let walker = HierarchyWalker::new(&self.store, &user.name, fetcher, sink);
        let mut ctx = RunContext::new();
        let mut skipped_objects = Vec::new();

        for raw_id in &params.ids {
            let Some(object) = self.lookup(params.kind, raw_id) else {
                let message = format!(
                    "{} {} does not exist or you do not have access to it",
                    params.kind, raw_id
                );
                tracing::warn!(kind = %params.kind, id = %raw_id, "object skipped");
                sink.event(ProgressEvent {
                    message,
                    elapsed: None,
                });
                skipped_objects.push(raw_id.clone());
                continue;
            };

            self.repo
                .set_active_group(GroupScope::Group(object.group_id()));
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; {} {}", object.kind(), object.id()),
                elapsed: Some(start.elapsed()),
            });
            let counters = dispatch(&walker, &object, &mut ctx);
            ctx.counters.images += counters.images;
            ctx.counters.datasets += counters.datasets;
            ctx.counters.projects += counters.projects;
        }

        tracing::info!(
            owner = %user.name,
            images = ctx.counters.images,
            datasets = ctx.counters.datasets,
            projects = ctx.counters.projects,
            filesets = ctx.ledger.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "run finished"
        );
        RunReport::completed(&user.name, ctx.counters, ctx.failed_images, skipped_objects)
    }

    fn lookup(&self, kind: ObjectKind, raw_id: &str) -> Option<RemoteObject> {
        let id: ObjectId = match raw_id.parse() {
            Ok(id) => id,
            Err(err) => {
                tracing::debug!(error = %err, "unparsable object id");
                return None;
            }
        };
        self.repo.set_active_group(GroupScope::All);
        match self.repo.get_object(kind, id) {
            Ok(object) => object,
            Err(err) => {
                tracing::warn!(kind = %kind, id = %id, error = %err, "object lookup failed");
                None
            }
        }
    }
}

fn dispatch<R: Repository + ?Sized>(
    walker: &HierarchyWalker<'_, R>,
    object: &RemoteObject,
    ctx: &mut RunContext,
) -> RunCounters {
    match object {
        RemoteObject::Image(image) => RunCounters {
            images: walker.process_image(image, ctx),
            ..RunCounters::default()
        },
        RemoteObject::Dataset(dataset) => {
            let summary = walker.process_dataset(dataset, &dataset.project_label(), ctx);
            RunCounters {
                images: summary.images_downloaded,
                datasets: usize::from(summary.complete),
                projects: 0,
            }
        }
        RemoteObject::Project(project) => {
            let summary = walker.process_project(project, ctx);
            RunCounters {
                images: summary.images_downloaded,
                datasets: summary.datasets_downloaded,
                projects: usize::from(summary.complete),
            }
        }
    }
}
