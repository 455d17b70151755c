use serde::Serialize;

pub const MISSING_ROOT_MESSAGE: &str = "The root HRM folder doesn't exist. Please correct it.";
pub const UNKNOWN_OWNER_MESSAGE: &str = "Cannot download objects";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub images: usize,
    pub datasets: usize,
    pub projects: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    MissingMountRoot,
    InactiveAccount,
    UnknownOwner,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub owner: Option<String>,
    #[serde(flatten)]
    pub counters: RunCounters,
    pub failed_images: Vec<i64>,
    pub skipped_objects: Vec<String>,
    pub message: String,
    pub finished_at: String,
}

impl RunReport {
    pub fn completed(
        owner: &str,
        counters: RunCounters,
        failed_images: Vec<i64>,
        skipped_objects: Vec<String>,
    ) -> Self {
        Self {
            status: RunStatus::Completed,
            owner: Some(owner.to_string()),
            counters,
            failed_images,
            skipped_objects,
            message: RunReporter::summary(&counters, owner),
            finished_at: timestamp(),
        }
    }

    /// A run refused before any download; counters stay at zero.
    pub fn refused(status: RunStatus, owner: Option<String>, message: String) -> Self {
        Self {
            status,
            owner,
            counters: RunCounters::default(),
            failed_images: Vec::new(),
            skipped_objects: Vec::new(),
            message,
            finished_at: timestamp(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

pub struct RunReporter;

impl RunReporter {
    pub fn summary(counters: &RunCounters, owner: &str) -> String {
        format!(
            "Downloaded {} image(s), {} dataset(s), {} project(s) from {}",
            counters.images, counters.datasets, counters.projects, owner
        )
    }

    pub fn inactive_account(owner: &str, account_url: &str) -> String {
        format!("Your HRM account ({owner}) is not active. Please go on {account_url}")
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
