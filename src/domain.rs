use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Label used for a missing project or dataset level.
pub const ORPHAN_LABEL: &str = "None";

static ID_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,;\s]+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Image,
    Dataset,
    Project,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Image => write!(f, "Image"),
            ObjectKind::Dataset => write!(f, "Dataset"),
            ObjectKind::Project => write!(f, "Project"),
        }
    }
}

impl FromStr for ObjectKind {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(ObjectKind::Image),
            "dataset" => Ok(ObjectKind::Dataset),
            "project" => Ok(ObjectKind::Project),
            _ => Err(MirrorError::InvalidObjectKind(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(i64);

impl ObjectId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = MirrorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.parse::<i64>() {
            Ok(id) if id >= 0 => Ok(Self(id)),
            _ => Err(MirrorError::InvalidObjectId(value.to_string())),
        }
    }
}

/// Splits raw id arguments on commas, semicolons and whitespace, keeping order.
pub fn split_id_list<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|value| {
            ID_SEPARATOR
                .split(value.as_ref())
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Lookup-only reference to a parent node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: i64,
    pub name: String,
}

impl ObjectRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn label(&self) -> String {
        node_label(self.id, &self.name)
    }
}

/// `{id}_{name}` as a single path segment.
pub fn node_label(id: i64, name: &str) -> String {
    format!("{id}_{}", path_segment(name))
}

/// Maps `name` onto one directory entry name: separators become `_`,
/// and a name that would resolve to `.`, `..` or nothing is replaced.
pub fn path_segment(name: &str) -> String {
    let segment: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();
    match segment.as_str() {
        "" | "." | ".." => segment.replace('.', "_") + "_",
        _ => segment,
    }
}

pub fn label_or_orphan(node: Option<&ObjectRef>) -> String {
    node.map(ObjectRef::label)
        .unwrap_or_else(|| ORPHAN_LABEL.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: i64,
    pub name: String,
    pub size: u64,
    /// Opaque content handle understood by the repository.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fileset {
    pub id: i64,
    pub files: Vec<RemoteFile>,
}

/// Dataset an image hangs under, together with that dataset's project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetParent {
    pub dataset: ObjectRef,
    pub project: Option<ObjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: i64,
    pub name: String,
    pub group_id: i64,
    pub parent: Option<DatasetParent>,
    pub fileset: Option<Fileset>,
}

impl Image {
    pub fn dataset_label(&self) -> String {
        label_or_orphan(self.parent.as_ref().map(|parent| &parent.dataset))
    }

    pub fn project_label(&self) -> String {
        label_or_orphan(self.parent.as_ref().and_then(|parent| parent.project.as_ref()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub group_id: i64,
    pub project: Option<ObjectRef>,
    pub images: Vec<Image>,
}

impl Dataset {
    pub fn label(&self) -> String {
        node_label(self.id, &self.name)
    }

    pub fn project_label(&self) -> String {
        label_or_orphan(self.project.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub group_id: i64,
    pub datasets: Vec<Dataset>,
}

impl Project {
    pub fn label(&self) -> String {
        node_label(self.id, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteObject {
    Image(Image),
    Dataset(Dataset),
    Project(Project),
}

impl RemoteObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            RemoteObject::Image(_) => ObjectKind::Image,
            RemoteObject::Dataset(_) => ObjectKind::Dataset,
            RemoteObject::Project(_) => ObjectKind::Project,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            RemoteObject::Image(image) => image.id,
            RemoteObject::Dataset(dataset) => dataset.id,
            RemoteObject::Project(project) => project.id,
        }
    }

    pub fn group_id(&self) -> i64 {
        match self {
            RemoteObject::Image(image) => image.group_id,
            RemoteObject::Dataset(dataset) => dataset.group_id,
            RemoteObject::Project(project) => project.group_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Group visibility applied to subsequent repository lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupScope {
    All,
    Group(i64),
}

impl GroupScope {
    pub fn admits(&self, group_id: i64) -> bool {
        match self {
            GroupScope::All => true,
            GroupScope::Group(id) => *id == group_id,
        }
    }
}
