//! Repository backed by a JSON snapshot of the remote hierarchy.
//!
//! The snapshot lists every node once with child ids; parents are resolved by
//! reverse lookup (first container listing the child wins).

use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Dataset, DatasetParent, Fileset, GroupScope, Image, ObjectId, ObjectKind, ObjectRef, Project,
    RemoteFile, RemoteObject, User,
};
use crate::error::MirrorError;
use crate::remote::{HttpTransfer, Repository};
use crate::store::MirrorStore;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Catalog {
    pub user: User,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    #[serde(default)]
    pub filesets: Vec<Fileset>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub datasets: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub images: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub fileset: Option<i64>,
}

impl Catalog {
    pub fn load(path: &Utf8Path) -> Result<Self, MirrorError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| MirrorError::CatalogRead(path.as_std_path().to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, MirrorError> {
        serde_json::from_str(content).map_err(|err| MirrorError::CatalogParse(err.to_string()))
    }

    fn project_entry(&self, id: i64) -> Option<&ProjectEntry> {
        self.projects.iter().find(|entry| entry.id == id)
    }

    fn dataset_entry(&self, id: i64) -> Option<&DatasetEntry> {
        self.datasets.iter().find(|entry| entry.id == id)
    }

    fn image_entry(&self, id: i64) -> Option<&ImageEntry> {
        self.images.iter().find(|entry| entry.id == id)
    }

    fn project_of(&self, dataset_id: i64) -> Option<ObjectRef> {
        self.projects
            .iter()
            .find(|entry| entry.datasets.contains(&dataset_id))
            .map(|entry| ObjectRef::new(entry.id, &entry.name))
    }

    fn dataset_of(&self, image_id: i64) -> Option<ObjectRef> {
        self.datasets
            .iter()
            .find(|entry| entry.images.contains(&image_id))
            .map(|entry| ObjectRef::new(entry.id, &entry.name))
    }

    pub fn image(&self, id: i64) -> Option<Image> {
        let entry = self.image_entry(id)?;
        let parent = self.dataset_of(id).map(|dataset| DatasetParent {
            project: self.project_of(dataset.id),
            dataset,
        });
        let fileset = entry
            .fileset
            .and_then(|fileset_id| self.filesets.iter().find(|set| set.id == fileset_id))
            .cloned();
        Some(Image {
            id: entry.id,
            name: entry.name.clone(),
            group_id: entry.group_id,
            parent,
            fileset,
        })
    }

    pub fn dataset(&self, id: i64) -> Option<Dataset> {
        let entry = self.dataset_entry(id)?;
        let images = entry
            .images
            .iter()
            .filter_map(|image_id| {
                let image = self.image(*image_id);
                if image.is_none() {
                    tracing::debug!(dataset = id, image = image_id, "catalog lists unknown image");
                }
                image
            })
            .collect();
        Some(Dataset {
            id: entry.id,
            name: entry.name.clone(),
            group_id: entry.group_id,
            project: self.project_of(id),
            images,
        })
    }

    pub fn project(&self, id: i64) -> Option<Project> {
        let entry = self.project_entry(id)?;
        let datasets = entry
            .datasets
            .iter()
            .filter_map(|dataset_id| self.dataset(*dataset_id))
            .collect();
        Some(Project {
            id: entry.id,
            name: entry.name.clone(),
            group_id: entry.group_id,
            datasets,
        })
    }
}

pub struct CatalogRepository {
    catalog: Catalog,
    base_dir: Utf8PathBuf,
    transfer: HttpTransfer,
    scope: Mutex<GroupScope>,
}

impl CatalogRepository {
    pub fn new(catalog: Catalog, base_dir: impl Into<Utf8PathBuf>, transfer: HttpTransfer) -> Self {
        Self {
            catalog,
            base_dir: base_dir.into(),
            transfer,
            scope: Mutex::new(GroupScope::All),
        }
    }

    /// Loads the snapshot at `path`; local sources resolve against its directory.
    pub fn open(path: &Utf8Path, transfer: HttpTransfer) -> Result<Self, MirrorError> {
        let catalog = Catalog::load(path)?;
        let base_dir = path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        Ok(Self::new(catalog, base_dir, transfer))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn active_scope(&self) -> GroupScope {
        *self
            .scope
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resolve_local(&self, source: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(source.strip_prefix("file://").unwrap_or(source));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl Repository for CatalogRepository {
    fn current_user(&self) -> Result<User, MirrorError> {
        if self.catalog.user.name.trim().is_empty() {
            return Err(MirrorError::UnknownUser(
                "catalog user has no name".to_string(),
            ));
        }
        Ok(self.catalog.user.clone())
    }

    fn set_active_group(&self, scope: GroupScope) {
        *self
            .scope
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = scope;
    }

    fn get_object(
        &self,
        kind: ObjectKind,
        id: ObjectId,
    ) -> Result<Option<RemoteObject>, MirrorError> {
        let object = match kind {
            ObjectKind::Image => self.catalog.image(id.get()).map(RemoteObject::Image),
            ObjectKind::Dataset => self.catalog.dataset(id.get()).map(RemoteObject::Dataset),
            ObjectKind::Project => self.catalog.project(id.get()).map(RemoteObject::Project),
        };
        let scope = self.active_scope();
        Ok(object.filter(|object| scope.admits(object.group_id())))
    }

    fn fetch_file(&self, file: &RemoteFile, target: &Utf8Path) -> Result<(), MirrorError> {
        if HttpTransfer::is_remote(&file.source) {
            self.transfer.download(&file.source, target)
        } else {
            MirrorStore::copy_file_atomic(&self.resolve_local(&file.source), target)
        }
    }
}
