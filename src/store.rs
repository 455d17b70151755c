use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::path_segment;
use crate::error::MirrorError;

pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/hrmshare";

const TEMP_PREFIX: &str = ".hrm-mirror";

/// Local mirror layout: `<mount>/<owner>/Raw/omero/<project>/<dataset>/Fileset_<id>`.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    mount_root: Utf8PathBuf,
}

impl MirrorStore {
    pub fn new(mount_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
        }
    }

    pub fn mount_root(&self) -> &Utf8Path {
        &self.mount_root
    }

    pub fn mount_root_exists(&self) -> bool {
        self.mount_root.is_dir()
    }

    pub fn owner_root(&self, owner: &str) -> Utf8PathBuf {
        self.mount_root.join(path_segment(owner))
    }

    pub fn dataset_path(
        &self,
        owner: &str,
        project_label: &str,
        dataset_label: &str,
    ) -> Utf8PathBuf {
        self.owner_root(owner)
            .join("Raw")
            .join("omero")
            .join(path_segment(project_label))
            .join(path_segment(dataset_label))
    }

    pub fn fileset_path(dataset_dir: &Utf8Path, fileset_id: i64) -> Utf8PathBuf {
        dataset_dir.join(format!("Fileset_{fileset_id}"))
    }

    /// Creates every missing segment of the dataset directory and returns it.
    ///
    /// Fails without touching the filesystem when the mount root is absent.
    /// Existing segments are left as they are.
    pub fn ensure_dataset_dir(
        &self,
        owner: &str,
        project_label: &str,
        dataset_label: &str,
    ) -> Result<Utf8PathBuf, MirrorError> {
        if !self.mount_root_exists() {
            return Err(MirrorError::MissingMountRoot(
                self.mount_root.as_std_path().to_path_buf(),
            ));
        }
        let path = self.dataset_path(owner, project_label, dataset_label);
        let owner_root = self.owner_root(owner);
        let contained = path.strip_prefix(&owner_root).is_ok_and(|rest| {
            rest.components()
                .all(|part| matches!(part, Utf8Component::Normal(_)))
        });
        if !contained {
            return Err(MirrorError::PathOutsideOwner {
                owner: owner.to_string(),
                path: path.to_string(),
            });
        }
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("create {path}: {err}")))?;
        Ok(path)
    }

    /// True when `dir` holds anything besides leftovers of interrupted writes.
    pub fn has_content(dir: &Utf8Path) -> bool {
        fs::read_dir(dir.as_std_path())
            .map(|entries| {
                entries.filter_map(Result::ok).any(|entry| {
                    !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
                })
            })
            .unwrap_or(false)
    }

    /// Removes everything below `dir`, files first, then the emptied
    /// subdirectories deepest first. `dir` itself is kept. Symlinks are
    /// removed, never followed.
    pub fn clear_dir_contents(dir: &Utf8Path) -> Result<(), MirrorError> {
        if !dir.is_dir() {
            return Ok(());
        }
        let mut subdirs = Vec::new();
        for (path, is_dir) in walk_dir(dir)? {
            if is_dir {
                subdirs.push(path);
            } else {
                fs::remove_file(&path).map_err(|err| {
                    MirrorError::Filesystem(format!("remove {}: {err}", path.display()))
                })?;
            }
        }
        subdirs.sort_by_key(|path| std::cmp::Reverse(path.components().count()));
        for path in subdirs {
            fs::remove_dir(&path).map_err(|err| {
                MirrorError::Filesystem(format!("remove {}: {err}", path.display()))
            })?;
        }
        Ok(())
    }

    pub fn write_atomic<R: Read + ?Sized>(
        reader: &mut R,
        dest: &Utf8Path,
    ) -> Result<(), MirrorError> {
        let parent = dest
            .parent()
            .ok_or_else(|| MirrorError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        io::copy(reader, temp.as_file_mut())
            .map_err(|err| MirrorError::Filesystem(format!("write {dest}: {err}")))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), MirrorError> {
        let mut file = fs::File::open(source.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("open {source}: {err}")))?;
        Self::write_atomic(&mut file, dest)
    }
}

/// Every entry below `root` with whether it is a real directory.
fn walk_dir(root: &Utf8Path) -> Result<Vec<(PathBuf, bool)>, MirrorError> {
    let mut items = Vec::new();
    let mut stack = vec![root.as_std_path().to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| MirrorError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .map(|kind| kind.is_dir())
                .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
            if is_dir {
                stack.push(path.clone());
            }
            items.push((path, is_dir));
        }
    }
    Ok(items)
}
