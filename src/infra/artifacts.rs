//! Short-lived storage for rendered images handed out by reference.
//!
//! Files live flat under a single serving directory and carry no metadata of
//! their own; their age is read from the filesystem modification time.

use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SOURCE: &str = "infra::artifacts";
const FILE_PREFIX: &str = "mermaid";

pub const METRIC_ARTIFACT_SWEPT: &str = "mermaid_gateway_artifacts_swept_total";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact name")]
    InvalidName,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of persisting one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub file_name: String,
    /// Relative URL path the artifact is served under.
    pub reference: String,
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Filesystem-backed artifact store with age-based eviction.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    url_prefix: String,
    ttl: Duration,
}

impl ArtifactStore {
    /// The directory is created lazily on the first [`ArtifactStore::save`].
    pub fn new(root: PathBuf, url_prefix: impl Into<String>, ttl: Duration) -> Self {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        Self {
            root,
            url_prefix,
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Persist `bytes` under a freshly generated name and return its reference.
    ///
    /// Names combine the current time in milliseconds with a random suffix, so
    /// concurrent writers never share a file and no locking is needed.
    pub fn save(&self, bytes: &[u8], extension: &str) -> Result<StoredArtifact, ArtifactError> {
        fs::create_dir_all(&self.root)?;

        let file_name = generate_name(extension);
        let absolute = self.root.join(&file_name);
        fs::write(&absolute, bytes)?;

        debug!(
            target = SOURCE,
            op = "artifacts::save",
            path = %absolute.display(),
            bytes = bytes.len(),
            "Stored render artifact"
        );

        Ok(StoredArtifact {
            reference: format!("{}/{}", self.url_prefix, file_name),
            file_name,
        })
    }

    /// Read an artifact by file name (the last segment of its reference).
    pub async fn read(&self, file_name: &str) -> Result<Bytes, ArtifactError> {
        let absolute = self.resolve(file_name)?;
        let data = tokio::fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Delete every file older than the configured TTL.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now())
    }

    /// Same as [`ArtifactStore::sweep`], measuring age against `now`.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return report,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "artifacts::sweep",
                    directory = %self.root.display(),
                    error = %err,
                    "Failed to list artifact directory"
                );
                report.failed += 1;
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(target = SOURCE, op = "artifacts::sweep", error = %err, "Skipping unreadable entry");
                    report.failed += 1;
                    continue;
                }
            };
            let path = entry.path();

            let modified = match entry.metadata().and_then(|meta| {
                if meta.is_file() {
                    meta.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => modified,
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        op = "artifacts::sweep",
                        path = %path.display(),
                        error = %err,
                        "Skipping artifact with unreadable metadata"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            // Files stamped in the future count as fresh.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.ttl {
                report.retained += 1;
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        op = "artifacts::sweep",
                        path = %path.display(),
                        error = %err,
                        "Failed to remove expired artifact"
                    );
                    report.failed += 1;
                }
            }
        }

        counter!(METRIC_ARTIFACT_SWEPT).increment(report.removed as u64);
        info!(
            target = SOURCE,
            op = "artifacts::sweep",
            removed = report.removed,
            retained = report.retained,
            failed = report.failed,
            "Artifact sweep finished"
        );

        report
    }

    fn resolve(&self, file_name: &str) -> Result<PathBuf, ArtifactError> {
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(file_name)),
            _ => Err(ArtifactError::InvalidName),
        }
    }
}

fn generate_name(extension: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix = Uuid::new_v4().simple().to_string();
    let extension = extension.trim_start_matches('.');
    format!("{FILE_PREFIX}-{millis}-{}.{extension}", &suffix[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path().join("temp"), "/temp/", HOUR)
    }

    fn backdate(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).expect("open");
        file.set_modified(SystemTime::now() - by).expect("set mtime");
    }

    #[tokio::test]
    async fn save_creates_directory_and_round_trips() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        assert!(!store.root().exists());

        let stored = store.save(b"\x89PNG payload", "png").expect("saved");
        assert!(stored.reference.starts_with("/temp/mermaid-"));
        assert!(stored.reference.ends_with(".png"));
        assert_eq!(
            stored.reference,
            format!("/temp/{}", stored.file_name),
            "prefix trailing slash must be normalised"
        );

        let bytes = store.read(&stored.file_name).await.expect("read back");
        assert_eq!(&bytes[..], b"\x89PNG payload");
    }

    #[test]
    fn generated_names_do_not_collide() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let first = store.save(b"a", "png").expect("first");
        let second = store.save(b"b", "png").expect("second");
        assert_ne!(first.file_name, second.file_name);
    }

    #[tokio::test]
    async fn read_rejects_traversal() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        for name in ["../secret", "/etc/passwd", "nested/file.png", ""] {
            let err = store.read(name).await.expect_err("must reject");
            assert!(matches!(err, ArtifactError::InvalidName), "{name}: {err:?}");
        }
    }

    #[test]
    fn sweep_removes_only_expired_files() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let old = store.save(b"old", "png").expect("old");
        let fresh = store.save(b"fresh", "png").expect("fresh");
        backdate(&store.root().join(&old.file_name), HOUR + Duration::from_secs(60));

        let report = store.sweep();

        assert_eq!(report.removed, 1);
        assert_eq!(report.retained, 1);
        assert!(!store.root().join(&old.file_name).exists());
        assert!(store.root().join(&fresh.file_name).exists());
    }

    #[test]
    fn sweep_without_directory_is_a_no_op() {
        let dir = TempDir::new().expect("temp dir");
        let report = store(&dir).sweep();
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn sweep_at_measures_age_from_supplied_clock() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let stored = store.save(b"x", "png").expect("saved");

        let report = store.sweep_at(SystemTime::now() + HOUR * 2);

        assert_eq!(report.removed, 1);
        assert!(!store.root().join(&stored.file_name).exists());
    }
}
