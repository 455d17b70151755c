use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use hrm_mirror::app::{ProgressEvent, ProgressSink};
use hrm_mirror::domain::{
    Dataset, DatasetParent, Fileset, GroupScope, Image, ObjectId, ObjectKind, ObjectRef, Project,
    RemoteFile, RemoteObject, User,
};
use hrm_mirror::error::MirrorError;
use hrm_mirror::fetcher::{FetchOutcome, FilesetFetcher, FilesetLedger, Layout};
use hrm_mirror::remote::Repository;
use hrm_mirror::store::MirrorStore;
use hrm_mirror::walker::{HierarchyWalker, RunContext};

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Default)]
struct MockRepo {
    failing_files: HashSet<i64>,
    fetched: Mutex<Vec<i64>>,
}

impl MockRepo {
    fn failing(ids: &[i64]) -> Self {
        Self {
            failing_files: ids.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

impl Repository for MockRepo {
    fn current_user(&self) -> Result<User, MirrorError> {
        Ok(User {
            name: "alice".to_string(),
            is_admin: false,
        })
    }

    fn set_active_group(&self, _scope: GroupScope) {}

    fn get_object(
        &self,
        _kind: ObjectKind,
        _id: ObjectId,
    ) -> Result<Option<RemoteObject>, MirrorError> {
        Ok(None)
    }

    fn fetch_file(&self, file: &RemoteFile, target: &Utf8Path) -> Result<(), MirrorError> {
        self.fetched.lock().unwrap().push(file.id);
        if self.failing_files.contains(&file.id) {
            return Err(MirrorError::TransferHttp("connection reset".to_string()));
        }
        fs::write(target.as_std_path(), format!("content-{}", file.id)).unwrap();
        Ok(())
    }
}

fn file(id: i64, name: &str) -> RemoteFile {
    RemoteFile {
        id,
        name: name.to_string(),
        size: 9,
        source: format!("mock://{id}"),
    }
}

fn fileset(id: i64, files: Vec<RemoteFile>) -> Fileset {
    Fileset { id, files }
}

fn image(
    id: i64,
    parent: Option<(ObjectRef, Option<ObjectRef>)>,
    fileset: Option<Fileset>,
) -> Image {
    Image {
        id,
        name: format!("image-{id}"),
        group_id: 3,
        parent: parent.map(|(dataset, project)| DatasetParent { dataset, project }),
        fileset,
    }
}

fn mount() -> (tempfile::TempDir, MirrorStore) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, MirrorStore::new(root))
}

fn walker<'a>(
    store: &'a MirrorStore,
    repo: &'a MockRepo,
    layout: Layout,
    overwrite: bool,
) -> HierarchyWalker<'a, MockRepo> {
    HierarchyWalker::new(
        store,
        "alice",
        FilesetFetcher::new(repo, layout, overwrite),
        &NoopSink,
    )
}

fn dataset(id: i64, name: &str, project: Option<ObjectRef>, images: Vec<Image>) -> Dataset {
    Dataset {
        id,
        name: name.to_string(),
        group_id: 3,
        project,
        images,
    }
}

#[test]
fn dataset_path_is_idempotent() {
    let (_temp, store) = mount();
    let first = store.ensure_dataset_dir("alice", "12_Demo", "5_A").unwrap();
    let second = store.ensure_dataset_dir("alice", "12_Demo", "5_A").unwrap();
    assert_eq!(first, second);
    assert!(first.is_dir());
    assert!(first.ends_with("alice/Raw/omero/12_Demo/5_A"));
}

#[test]
fn dataset_path_requires_mount_root() {
    let (temp, _) = mount();
    let missing = Utf8PathBuf::from_path_buf(temp.path().join("not-mounted")).unwrap();
    let store = MirrorStore::new(missing.clone());
    let err = store.ensure_dataset_dir("alice", "None", "None").unwrap_err();
    assert!(matches!(err, MirrorError::MissingMountRoot(_)));
    assert!(!missing.exists());
}

#[test]
fn shared_fileset_is_fetched_once() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let shared = fileset(900, vec![file(1, "a.czi"), file(2, "a.czi.companion")]);
    let images = (100..103)
        .map(|id| image(id, None, Some(shared.clone())))
        .collect();
    let data = dataset(5, "A", None, images);

    let mut ctx = RunContext::new();
    let summary =
        walker(&store, &repo, Layout::Fileset, false).process_dataset(&data, "None", &mut ctx);

    assert_eq!(repo.fetch_count(), 2);
    assert_eq!(summary.images_downloaded, 3);
    assert!(summary.complete);
    assert_eq!(ctx.ledger.outcome(900), Some(true));
}

#[test]
fn failed_shared_fileset_is_not_retried() {
    let (_temp, store) = mount();
    let repo = MockRepo::failing(&[1]);
    let shared = fileset(900, vec![file(1, "a.czi")]);
    let images = vec![
        image(100, None, Some(shared.clone())),
        image(101, None, Some(shared)),
    ];
    let data = dataset(5, "A", None, images);

    let mut ctx = RunContext::new();
    let summary =
        walker(&store, &repo, Layout::Fileset, false).process_dataset(&data, "None", &mut ctx);

    assert_eq!(repo.fetch_count(), 1);
    assert_eq!(summary.images_downloaded, 0);
    assert_eq!(summary.failed_images, vec![100, 101]);
    assert!(!summary.complete);
}

#[test]
fn dataset_completeness_counts_failures() {
    let (_temp, store) = mount();
    let repo = MockRepo::failing(&[30]);
    let images = vec![
        image(100, None, Some(fileset(1, vec![file(10, "a.tif")]))),
        image(101, None, Some(fileset(2, vec![file(20, "b.tif")]))),
        image(102, None, Some(fileset(3, vec![file(30, "c.tif")]))),
    ];
    let data = dataset(5, "A", None, images);

    let mut ctx = RunContext::new();
    let summary =
        walker(&store, &repo, Layout::Fileset, false).process_dataset(&data, "None", &mut ctx);

    assert_eq!(summary.images_total, 3);
    assert_eq!(summary.images_downloaded, 2);
    assert_eq!(summary.failed_images, vec![102]);
    assert!(!summary.complete);
    assert_eq!(ctx.failed_images, vec![102]);
}

#[test]
fn empty_dataset_is_complete() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let data = dataset(7, "Empty", None, Vec::new());

    let mut ctx = RunContext::new();
    let summary =
        walker(&store, &repo, Layout::Fileset, false).process_dataset(&data, "None", &mut ctx);

    assert_eq!(summary.images_downloaded, 0);
    assert!(summary.complete);
    assert!(store.dataset_path("alice", "None", "7_Empty").is_dir());
}

#[test]
fn unreachable_dataset_reports_nothing() {
    let (temp, _) = mount();
    let store = MirrorStore::new(Utf8PathBuf::from_path_buf(temp.path().join("gone")).unwrap());
    let repo = MockRepo::default();
    let only = image(100, None, Some(fileset(1, vec![file(10, "a.tif")])));
    let data = dataset(5, "A", None, vec![only]);

    let mut ctx = RunContext::new();
    let summary =
        walker(&store, &repo, Layout::Fileset, false).process_dataset(&data, "None", &mut ctx);

    assert_eq!(summary.images_downloaded, 0);
    assert!(!summary.complete);
    assert_eq!(repo.fetch_count(), 0);
}

#[test]
fn overwrite_replaces_stale_content() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let dataset_dir = store.ensure_dataset_dir("alice", "None", "None").unwrap();
    let fileset_dir = MirrorStore::fileset_path(&dataset_dir, 900);
    fs::create_dir_all(fileset_dir.join("old/deeper")).unwrap();
    fs::write(fileset_dir.join("stale.czi"), b"stale").unwrap();
    fs::write(fileset_dir.join("old/deeper/stale.txt"), b"stale").unwrap();

    let orphan = image(100, None, Some(fileset(900, vec![file(1, "fresh.czi")])));
    let mut ctx = RunContext::new();
    let downloaded = walker(&store, &repo, Layout::Fileset, true).process_image(&orphan, &mut ctx);

    assert_eq!(downloaded, 1);
    let mut names: Vec<String> = fs::read_dir(fileset_dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["fresh.czi".to_string()]);
    assert_eq!(
        fs::read_to_string(fileset_dir.join("fresh.czi")).unwrap(),
        "content-1"
    );
}

#[test]
fn existing_fileset_is_skipped_without_overwrite() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let dataset_dir = store.ensure_dataset_dir("alice", "None", "None").unwrap();
    let fileset_dir = MirrorStore::fileset_path(&dataset_dir, 900);
    fs::create_dir_all(&fileset_dir).unwrap();
    fs::write(fileset_dir.join("a.czi"), b"already here").unwrap();

    let orphan = image(100, None, Some(fileset(900, vec![file(1, "a.czi")])));
    let fetcher = FilesetFetcher::new(&repo, Layout::Fileset, false);
    let mut ledger = FilesetLedger::new();
    let outcome = fetcher.fetch(&orphan, &dataset_dir, &mut ledger, &NoopSink);

    assert_eq!(outcome, FetchOutcome::AlreadyPresent { fileset_id: 900 });
    assert_eq!(repo.fetch_count(), 0);
    assert_eq!(
        fs::read_to_string(fileset_dir.join("a.czi")).unwrap(),
        "already here"
    );
}

#[test]
fn remote_names_cannot_leave_the_owner_folder() {
    let (temp, store) = mount();
    let repo = MockRepo::default();
    let only = image(100, None, Some(fileset(900, vec![file(1, "a.czi")])));
    let data = dataset(5, "x/../../../../../bob/Raw", None, vec![only]);

    let mut ctx = RunContext::new();
    let summary =
        walker(&store, &repo, Layout::Fileset, false).process_dataset(&data, "None", &mut ctx);

    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    assert_eq!(summary.images_downloaded, 1);
    assert!(!root.join("bob").exists());
    assert!(
        root.join("alice/Raw/omero/None/5_x_.._.._.._.._.._bob_Raw/Fileset_900/a.czi")
            .is_file()
    );
}

#[test]
fn store_flattens_separators_in_labels() {
    let (_temp, store) = mount();
    let dir = store.ensure_dataset_dir("alice", "..", "../../bob").unwrap();
    assert!(dir.ends_with("alice/Raw/omero/___/.._.._bob"));
}

#[cfg(unix)]
#[test]
fn overwrite_refreshes_fileset_holding_a_directory_symlink() {
    let (temp, store) = mount();
    let repo = MockRepo::default();
    let dataset_dir = store.ensure_dataset_dir("alice", "None", "None").unwrap();
    let fileset_dir = MirrorStore::fileset_path(&dataset_dir, 900);
    let elsewhere = temp.path().join("elsewhere");
    fs::create_dir_all(&elsewhere).unwrap();
    fs::create_dir_all(&fileset_dir).unwrap();
    std::os::unix::fs::symlink(&elsewhere, fileset_dir.join("link")).unwrap();

    let orphan = image(100, None, Some(fileset(900, vec![file(1, "fresh.czi")])));
    let mut ctx = RunContext::new();
    let downloaded = walker(&store, &repo, Layout::Fileset, true).process_image(&orphan, &mut ctx);

    assert_eq!(downloaded, 1);
    assert_eq!(repo.fetch_count(), 1);
    assert!(!fileset_dir.join("link").exists());
    assert!(elsewhere.is_dir());
}

#[test]
fn missing_fileset_fails_the_image_only() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let orphan = image(100, None, None);
    let mut ctx = RunContext::new();

    let downloaded = walker(&store, &repo, Layout::Fileset, false).process_image(&orphan, &mut ctx);

    assert_eq!(downloaded, 0);
    assert_eq!(ctx.failed_images, vec![100]);
    assert!(ctx.ledger.is_empty());
}

#[test]
fn orphan_image_lands_in_none_bucket() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let orphan = image(100, None, Some(fileset(900, vec![file(1, "a.czi")])));
    let mut ctx = RunContext::new();

    let downloaded = walker(&store, &repo, Layout::Fileset, false).process_image(&orphan, &mut ctx);

    assert_eq!(downloaded, 1);
    let expected = store
        .mount_root()
        .join("alice/Raw/omero/None/None/Fileset_900/a.czi");
    assert!(expected.is_file());
}

#[test]
fn image_under_detached_dataset_keeps_dataset_label() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let img = image(
        100,
        Some((ObjectRef::new(5, "A"), None)),
        Some(fileset(900, vec![file(1, "a.czi")])),
    );
    let mut ctx = RunContext::new();

    walker(&store, &repo, Layout::Fileset, false).process_image(&img, &mut ctx);

    assert!(
        store
            .mount_root()
            .join("alice/Raw/omero/None/5_A/Fileset_900/a.czi")
            .is_file()
    );
}

#[test]
fn flat_layout_skips_existing_files_individually() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let dataset_dir = store.ensure_dataset_dir("alice", "None", "None").unwrap();
    fs::write(dataset_dir.join("a.czi"), b"kept").unwrap();

    let orphan = image(
        100,
        None,
        Some(fileset(900, vec![file(1, "a.czi"), file(2, "b.czi")])),
    );
    let mut ctx = RunContext::new();
    let downloaded = walker(&store, &repo, Layout::Flat, false).process_image(&orphan, &mut ctx);

    assert_eq!(downloaded, 1);
    assert_eq!(*repo.fetched.lock().unwrap(), vec![2]);
    assert_eq!(fs::read_to_string(dataset_dir.join("a.czi")).unwrap(), "kept");
    assert!(dataset_dir.join("b.czi").is_file());
    assert!(!MirrorStore::fileset_path(&dataset_dir, 900).exists());
}

#[test]
fn project_with_shared_and_missing_filesets() {
    let (_temp, store) = mount();
    let repo = MockRepo::default();
    let project_ref = ObjectRef::new(12, "Demo");
    let a = ObjectRef::new(5, "A");
    let b = ObjectRef::new(6, "B");
    let shared = fileset(900, vec![file(1, "a.czi")]);

    let project = Project {
        id: 12,
        name: "Demo".to_string(),
        group_id: 3,
        datasets: vec![
            dataset(
                5,
                "A",
                Some(project_ref.clone()),
                vec![
                    image(
                        100,
                        Some((a.clone(), Some(project_ref.clone()))),
                        Some(shared.clone()),
                    ),
                    image(101, Some((a, Some(project_ref.clone()))), None),
                ],
            ),
            dataset(
                6,
                "B",
                Some(project_ref.clone()),
                vec![image(102, Some((b, Some(project_ref))), Some(shared))],
            ),
        ],
    };

    let mut ctx = RunContext::new();
    let summary = walker(&store, &repo, Layout::Fileset, false).process_project(&project, &mut ctx);

    assert_eq!(summary.images_downloaded, 2);
    assert_eq!(summary.datasets_downloaded, 1);
    assert_eq!(summary.incomplete_datasets, vec![5]);
    assert!(!summary.complete);
    assert_eq!(repo.fetch_count(), 1);
    assert!(
        store
            .mount_root()
            .join("alice/Raw/omero/12_Demo/5_A/Fileset_900/a.czi")
            .is_file()
    );
    assert!(store.dataset_path("alice", "12_Demo", "6_B").is_dir());
}
