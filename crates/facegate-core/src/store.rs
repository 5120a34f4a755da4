//! Identity store: enrolled name → embedding, with hot reload and atomic persistence.
//!
//! Readers take a point-in-time `Arc<Gallery>` under a short lock and scan it
//! without holding anything. Mutations are serialized by a separate writer
//! lock: the next gallery is built off to the side, persisted, and only then
//! swapped in, so a failed write leaves the live mapping untouched and no
//! reader ever sees a half-applied change.

use crate::provider::{EmbeddingProvider, ProviderError};
use crate::snapshot::{self, SnapshotError, SnapshotMarker};
use crate::types::{Embedding, EuclideanMatcher, Gallery, MatchResult, Matcher};
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const MAX_NAME_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("exactly one face is required, found {0}")]
    AmbiguousInput(usize),
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("embedding has {actual} dimensions, store holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("failed to persist snapshot: {0}")]
    Persistence(#[source] SnapshotError),
    #[error("failed to load snapshot: {0}")]
    Load(#[source] SnapshotError),
    #[error("cannot read directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Persisted snapshot.
    pub db_path: PathBuf,
    /// Where enrollment images are kept, `<name>.jpg`.
    pub faces_dir: Option<PathBuf>,
    /// Recognition: a lookup is `matched` strictly below this distance.
    pub match_threshold: f32,
    /// Enrollment: existing records strictly closer than this are replaced.
    pub replace_threshold: f32,
}

/// Result of a successful single enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Registered { name: String },
    /// `previous` lists every record dropped to make room, including a record
    /// that had the same name.
    Replaced { name: String, previous: Vec<String> },
}

impl EnrollOutcome {
    pub fn name(&self) -> &str {
        match self {
            EnrollOutcome::Registered { name } | EnrollOutcome::Replaced { name, .. } => name,
        }
    }
}

impl std::fmt::Display for EnrollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollOutcome::Registered { name } => write!(f, "registered new identity {name}"),
            EnrollOutcome::Replaced { name, previous } => {
                write!(f, "registered {name}, replaced existing identity {}", previous.join(", "))
            }
        }
    }
}

/// Result of a batch enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub registered: usize,
    /// File names that were skipped.
    pub failed: Vec<String>,
}

struct Current {
    gallery: Arc<Gallery>,
    marker: Option<SnapshotMarker>,
}

pub struct IdentityStore {
    config: StoreConfig,
    current: Mutex<Current>,
    writer: Mutex<()>,
}

impl IdentityStore {
    /// Open the store, loading the snapshot if one exists.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let marker = SnapshotMarker::read(&config.db_path).map_err(|e| StoreError::Load(e.into()))?;
        let gallery = match marker {
            Some(_) => snapshot::load(&config.db_path).map_err(StoreError::Load)?,
            None => Gallery::new(),
        };

        tracing::info!(
            path = %config.db_path.display(),
            identities = gallery.len(),
            "identity store opened"
        );

        Ok(Self {
            config,
            current: Mutex::new(Current {
                gallery: Arc::new(gallery),
                marker,
            }),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Point-in-time view of the mapping.
    pub fn snapshot(&self) -> Arc<Gallery> {
        Arc::clone(&lock(&self.current).gallery)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// Nearest enrolled identity; `None` when nothing is enrolled.
    pub fn match_embedding(&self, probe: &Embedding) -> Option<MatchResult> {
        let gallery = self.snapshot();
        EuclideanMatcher.nearest(probe, &gallery, self.config.match_threshold)
    }

    /// Enroll the single face in `image` under `name`.
    pub fn enroll<P>(&self, provider: &mut P, name: &str, image: &RgbImage) -> Result<EnrollOutcome, StoreError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        validate_name(name)?;
        let embedding = single_face_embedding(provider, image)?;

        let outcome = {
            let writer = lock(&self.writer);
            let mut next = (*self.snapshot()).clone();
            check_dimension(&next, &embedding)?;

            let previous = insert_replacing(&mut next, name, embedding, self.config.replace_threshold);
            self.commit(&writer, next)?;

            if previous.is_empty() {
                EnrollOutcome::Registered { name: name.to_string() }
            } else {
                EnrollOutcome::Replaced {
                    name: name.to_string(),
                    previous,
                }
            }
        };

        self.save_image(name, image);
        tracing::info!(%outcome, "enrolled");
        Ok(outcome)
    }

    /// Enroll every eligible image in `directory`; the file stem is the name.
    ///
    /// Bad files are reported in [`BatchOutcome::failed`] and do not stop the
    /// batch. The snapshot is written exactly once.
    pub fn enroll_batch<P>(&self, provider: &mut P, directory: &Path) -> Result<BatchOutcome, StoreError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let files = eligible_images(directory)?;

        let mut outcome = BatchOutcome::default();
        let mut extracted = Vec::with_capacity(files.len());
        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match extract_file(provider, &path) {
                Ok((name, embedding)) => extracted.push((file_name, name, embedding)),
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "batch enroll: skipping file");
                    outcome.failed.push(file_name);
                }
            }
        }

        let writer = lock(&self.writer);
        let mut next = (*self.snapshot()).clone();
        for (file_name, name, embedding) in extracted {
            if let Err(e) = check_dimension(&next, &embedding) {
                tracing::warn!(file = %file_name, error = %e, "batch enroll: skipping file");
                outcome.failed.push(file_name);
                continue;
            }
            insert_replacing(&mut next, &name, embedding, self.config.replace_threshold);
            outcome.registered += 1;
        }
        self.commit(&writer, next)?;
        drop(writer);

        outcome.failed.sort();
        tracing::info!(
            directory = %directory.display(),
            registered = outcome.registered,
            failed = outcome.failed.len(),
            "batch enrollment finished"
        );
        Ok(outcome)
    }

    /// Remove `name`, persist, and best-effort delete its enrollment images.
    pub fn revoke(&self, name: &str) -> Result<(), StoreError> {
        {
            let writer = lock(&self.writer);
            let base = self.snapshot();
            if !base.contains_key(name) {
                return Err(StoreError::NotFound(name.to_string()));
            }
            let mut next = (*base).clone();
            next.remove(name);
            self.commit(&writer, next)?;
        }

        self.remove_images(name);
        tracing::info!(name, "revoked");
        Ok(())
    }

    /// Swap in the persisted snapshot if it changed since the last load or write.
    ///
    /// Returns whether a new mapping was installed. On error the previous
    /// mapping stays in place.
    pub fn reload(&self) -> Result<bool, StoreError> {
        let _writer = lock(&self.writer);

        // Marker first: a write racing the load is then picked up next time.
        let marker = SnapshotMarker::read(&self.config.db_path).map_err(|e| StoreError::Load(e.into()))?;
        let Some(marker) = marker else {
            return Ok(false);
        };
        if lock(&self.current).marker == Some(marker) {
            return Ok(false);
        }

        let gallery = snapshot::load(&self.config.db_path).map_err(StoreError::Load)?;
        let identities = gallery.len();
        *lock(&self.current) = Current {
            gallery: Arc::new(gallery),
            marker: Some(marker),
        };

        tracing::info!(identities, "identity store reloaded");
        Ok(true)
    }

    /// Persist `next` and make it current. Callers hold the writer lock.
    fn commit(&self, _writer: &MutexGuard<'_, ()>, next: Gallery) -> Result<(), StoreError> {
        let marker = snapshot::save(&self.config.db_path, &next).map_err(StoreError::Persistence)?;
        *lock(&self.current) = Current {
            gallery: Arc::new(next),
            marker: Some(marker),
        };
        Ok(())
    }

    fn save_image(&self, name: &str, image: &RgbImage) {
        let Some(dir) = &self.config.faces_dir else {
            return;
        };
        let path = dir.join(format!("{name}.jpg"));
        let result = fs::create_dir_all(dir)
            .map_err(image::ImageError::IoError)
            .and_then(|()| image.save_with_format(&path, ImageFormat::Jpeg));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to save enrollment image");
        }
    }

    fn remove_images(&self, name: &str) {
        let Some(dir) = &self.config.faces_dir else {
            return;
        };
        for ext in IMAGE_EXTENSIONS {
            let path = dir.join(format!("{name}.{ext}"));
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed enrollment image"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove enrollment image"),
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.trim().is_empty()
        || name.len() > MAX_NAME_LEN
        || name.starts_with('.')
        || name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

fn single_face_embedding<P>(provider: &mut P, image: &RgbImage) -> Result<Embedding, StoreError>
where
    P: EmbeddingProvider + ?Sized,
{
    let faces = provider.detect(image)?;
    match faces.as_slice() {
        [] => Err(StoreError::NoFaceDetected),
        [face] => Ok(provider.extract(image, face)?),
        many => Err(StoreError::AmbiguousInput(many.len())),
    }
}

fn check_dimension(gallery: &Gallery, embedding: &Embedding) -> Result<(), StoreError> {
    match gallery.values().next() {
        Some(existing) if existing.dimension() != embedding.dimension() => Err(StoreError::DimensionMismatch {
            expected: existing.dimension(),
            actual: embedding.dimension(),
        }),
        _ => Ok(()),
    }
}

/// Insert `embedding` under `name`, first dropping every record within
/// `threshold` of it. Returns the names that were dropped or overwritten.
fn insert_replacing(gallery: &mut Gallery, name: &str, embedding: Embedding, threshold: f32) -> Vec<String> {
    let mut previous: Vec<String> = gallery
        .iter()
        .filter(|(_, existing)| existing.euclidean_distance(&embedding) < threshold)
        .map(|(existing_name, _)| existing_name.clone())
        .collect();
    for stale in &previous {
        gallery.remove(stale);
    }
    if gallery.insert(name.to_string(), embedding).is_some() {
        previous.push(name.to_string());
    }
    previous
}

fn eligible_images(directory: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = fs::read_dir(directory).map_err(|source| StoreError::Directory {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Error, Debug)]
enum FileError {
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn extract_file<P>(provider: &mut P, path: &Path) -> Result<(String, Embedding), FileError>
where
    P: EmbeddingProvider + ?Sized,
{
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    validate_name(&name)?;
    let image = image::open(path)?.to_rgb8();
    let embedding = single_face_embedding(provider, &image)?;
    Ok((name, embedding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use image::Rgb;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Pixel (0,0) red channel = number of faces; pixel (1,0) = the embedding, scaled to [0,1].
    struct FakeProvider;

    impl EmbeddingProvider for FakeProvider {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ProviderError> {
            let count = image.get_pixel(0, 0)[0] as usize;
            Ok((0..count)
                .map(|i| BoundingBox {
                    x: i as f32 * 10.0,
                    y: 0.0,
                    width: 10.0,
                    height: 10.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn extract(&mut self, image: &RgbImage, _face: &BoundingBox) -> Result<Embedding, ProviderError> {
            let p = image.get_pixel(1, 0);
            Ok(Embedding::new(p.0.iter().map(|&v| v as f32 / 255.0).collect()))
        }
    }

    fn face_image(faces: u8, rgb: [u8; 3]) -> RgbImage {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        img.put_pixel(0, 0, Rgb([faces, 0, 0]));
        img.put_pixel(1, 0, Rgb(rgb));
        img
    }

    fn embedding_of(rgb: [u8; 3]) -> Embedding {
        Embedding::new(rgb.iter().map(|&v| v as f32 / 255.0).collect())
    }

    fn config(dir: &Path) -> StoreConfig {
        StoreConfig {
            db_path: dir.join("faces.db"),
            faces_dir: Some(dir.join("faces")),
            match_threshold: 0.6,
            replace_threshold: 0.6,
        }
    }

    fn open(dir: &Path) -> IdentityStore {
        IdentityStore::open(config(dir)).unwrap()
    }

    #[test]
    fn test_enroll_then_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        let outcome = store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();
        assert_eq!(outcome, EnrollOutcome::Registered { name: "alice".into() });

        let result = store.match_embedding(&embedding_of([250, 5, 0])).unwrap();
        assert_eq!(result.name, "alice");
        assert!(result.matched);
        assert!(result.distance < 0.4);
    }

    #[test]
    fn test_enroll_without_face_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        let err = store.enroll(&mut FakeProvider, "alice", &face_image(0, [255, 0, 0])).unwrap_err();
        assert!(matches!(err, StoreError::NoFaceDetected));
        assert!(store.is_empty());
        assert!(!store.config().db_path.exists());
    }

    #[test]
    fn test_enroll_with_two_faces_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "bob", &face_image(1, [0, 255, 0])).unwrap();
        let before = fs::read(&store.config().db_path).unwrap();

        let err = store.enroll(&mut FakeProvider, "alice", &face_image(2, [255, 0, 0])).unwrap_err();
        assert!(matches!(err, StoreError::AmbiguousInput(2)));
        assert_eq!(store.names(), vec!["bob".to_string()]);
        assert_eq!(fs::read(&store.config().db_path).unwrap(), before);
    }

    #[test]
    fn test_replace_on_similarity_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "alice", &face_image(1, [200, 10, 10])).unwrap();

        let outcome = store.enroll(&mut FakeProvider, "bob", &face_image(1, [200, 12, 10])).unwrap();
        assert_eq!(
            outcome,
            EnrollOutcome::Replaced {
                name: "bob".into(),
                previous: vec!["alice".into()],
            }
        );
        assert_eq!(store.names(), vec!["bob".to_string()]);

        store.enroll(&mut FakeProvider, "bob", &face_image(1, [200, 12, 10])).unwrap();
        assert_eq!(store.names(), vec!["bob".to_string()]);
        assert!(outcome.to_string().contains("replaced existing identity alice"));
    }

    #[test]
    fn test_dissimilar_faces_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();
        store.enroll(&mut FakeProvider, "bob", &face_image(1, [0, 0, 255])).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        for name in ["", "  ", "../etc", "a/b", ".hidden"] {
            let err = store.enroll(&mut FakeProvider, name, &face_image(1, [1, 2, 3])).unwrap_err();
            assert!(matches!(err, StoreError::InvalidName(_)), "{name:?}");
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut seeded = Gallery::new();
        seeded.insert("wide".into(), Embedding::new(vec![0.0; 5]));
        snapshot::save(&cfg.db_path, &seeded).unwrap();

        let store = IdentityStore::open(cfg).unwrap();
        let err = store.enroll(&mut FakeProvider, "alice", &face_image(1, [1, 2, 3])).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 5, actual: 3 }));
    }

    #[test]
    fn test_persistence_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "bob", &face_image(1, [0, 0, 255])).unwrap();

        // A directory squatting on the temp path makes the next write fail.
        fs::create_dir(dir.path().join("faces.db.tmp")).unwrap();

        let err = store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
        assert_eq!(store.names(), vec!["bob".to_string()]);
        assert!(!dir.path().join("faces/alice.jpg").exists());
        assert_eq!(open(dir.path()).names(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_revoke_present_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();
        store.enroll(&mut FakeProvider, "bob", &face_image(1, [0, 0, 255])).unwrap();
        let image_path = dir.path().join("faces/alice.jpg");
        assert!(image_path.exists());

        store.revoke("alice").unwrap();
        assert_eq!(store.names(), vec!["bob".to_string()]);
        assert!(!image_path.exists());

        let reopened = open(dir.path());
        assert_eq!(reopened.names(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_revoke_absent_identity_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();
        let before = fs::read(&store.config().db_path).unwrap();
        let marker = SnapshotMarker::read(&store.config().db_path).unwrap();

        let err = store.revoke("mallory").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref n) if n == "mallory"));
        assert_eq!(fs::read(&store.config().db_path).unwrap(), before);
        assert_eq!(SnapshotMarker::read(&store.config().db_path).unwrap(), marker);
    }

    #[test]
    fn test_snapshot_roundtrip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();
        store.enroll(&mut FakeProvider, "bob", &face_image(1, [0, 255, 0])).unwrap();
        store.enroll(&mut FakeProvider, "carol", &face_image(1, [0, 0, 255])).unwrap();

        let reopened = open(dir.path());
        assert_eq!(*reopened.snapshot(), *store.snapshot());
    }

    #[test]
    fn test_reload_picks_up_external_write() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = open(dir.path());
        assert!(!watcher.reload().unwrap(), "missing file is a no-op");

        let writer = open(dir.path());
        writer.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();

        assert!(watcher.reload().unwrap());
        assert_eq!(watcher.names(), vec!["alice".to_string()]);
        assert!(!watcher.reload().unwrap(), "unchanged marker is a no-op");
    }

    #[test]
    fn test_own_write_does_not_trigger_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();
        assert!(!store.reload().unwrap());
    }

    #[test]
    fn test_failed_reload_keeps_previous_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.enroll(&mut FakeProvider, "alice", &face_image(1, [255, 0, 0])).unwrap();

        fs::write(&store.config().db_path, b"definitely not a snapshot").unwrap();
        assert!(matches!(store.reload(), Err(StoreError::Load(_))));
        assert_eq!(store.names(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_reload_never_exposes_mixed_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let side = |prefix: &str, value: f32| -> PathBuf {
            let g: Gallery = (0..50)
                .map(|i| (format!("{prefix}{i:02}"), Embedding::new(vec![value, i as f32])))
                .collect();
            let path = dir.path().join(format!("{prefix}.db"));
            snapshot::save(&path, &g).unwrap();
            path
        };
        let a = side("a", 0.0);
        let b = side("b", 1.0);
        fs::copy(&a, &cfg.db_path).unwrap();

        let store = Arc::new(IdentityStore::open(cfg.clone()).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        let gallery = store.snapshot();
                        let first = gallery.keys().next().unwrap().chars().next().unwrap();
                        assert_eq!(gallery.len(), 50);
                        assert!(gallery.keys().all(|k| k.starts_with(first)));
                        let hit = store.match_embedding(&Embedding::new(vec![0.0, 7.0])).unwrap();
                        assert!(hit.name.ends_with("07"));
                    }
                })
            })
            .collect();

        for round in 0..40 {
            let src = if round % 2 == 0 { &b } else { &a };
            let staging = dir.path().join("staging.db");
            fs::copy(src, &staging).unwrap();
            fs::rename(&staging, &cfg.db_path).unwrap();
            let _ = store.reload();
        }
        done.store(true, Ordering::Relaxed);
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_enroll_batch() {
        let dir = tempfile::tempdir().unwrap();
        let batch = dir.path().join("batch");
        fs::create_dir_all(&batch).unwrap();
        face_image(1, [255, 0, 0]).save(batch.join("alice.png")).unwrap();
        face_image(1, [0, 0, 255]).save(batch.join("bob.PNG")).unwrap();
        face_image(2, [0, 255, 0]).save(batch.join("group.png")).unwrap();
        face_image(0, [0, 255, 0]).save(batch.join("blank.png")).unwrap();
        fs::write(batch.join("broken.jpg"), b"not an image").unwrap();
        fs::write(batch.join("notes.txt"), b"ignored").unwrap();

        let store = open(dir.path());
        let outcome = store.enroll_batch(&mut FakeProvider, &batch).unwrap();

        assert_eq!(outcome.registered, 2);
        assert_eq!(outcome.failed, vec!["blank.png", "broken.jpg", "group.png"]);
        assert_eq!(store.names(), vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(open(dir.path()).len(), 2);
    }

    #[test]
    fn test_enroll_batch_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let err = store.enroll_batch(&mut FakeProvider, &dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, StoreError::Directory { .. }));
    }
}
