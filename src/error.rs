use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MirrorError {
    #[error("invalid object kind: {0}")]
    InvalidObjectKind(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    #[error("mount root does not exist or is not a directory: {0}")]
    #[diagnostic(help("the HRM share must be mounted before running a mirror"))]
    MissingMountRoot(PathBuf),

    #[error("no fileset attached to image {0}")]
    MissingFileset(i64),

    #[error("unable to resolve the current user: {0}")]
    UnknownUser(String),

    #[error("invalid file name in fileset {fileset}: {name}")]
    InvalidFileName { fileset: i64, name: String },

    #[error("path {path} leaves the folder of {owner}")]
    PathOutsideOwner { owner: String, path: String },

    #[error("transfer failed: {0}")]
    TransferHttp(String),

    #[error("transfer returned status {status} for {url}")]
    TransferStatus { status: u16, url: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no catalog configured")]
    #[diagnostic(help("pass --catalog or set \"catalog\" in hrm-mirror.json"))]
    MissingCatalog,

    #[error("failed to read catalog at {0}")]
    CatalogRead(PathBuf),

    #[error("failed to parse catalog: {0}")]
    CatalogParse(String),
}
