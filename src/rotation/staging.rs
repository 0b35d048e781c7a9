use crate::naming::{MalformedName, ObjectName};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of copies still being written.
const PARTIAL_SUFFIX: &str = ".tmp";

/// A rotated file waiting for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub name: ObjectName,
}

/// Result of listing a staging directory.
#[derive(Debug, Default)]
pub struct StagingScan {
    /// Parseable files, oldest first.
    pub staged: Vec<StagedFile>,
    pub malformed: Vec<MalformedName>,
}

/// Local directory of rotated files for one source.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn path_for(&self, name: &ObjectName) -> PathBuf {
        self.dir.join(name.staged_file_name())
    }

    /// List regular files in the staging directory, skipping copies still
    /// being written. A missing directory is treated as empty.
    pub async fn scan(&self) -> io::Result<StagingScan> {
        let mut scan = StagingScan::default();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(scan),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.ends_with(PARTIAL_SUFFIX) {
                debug!(file = %file_name, "Skipping partial copy");
                continue;
            }
            match ObjectName::parse_staged(&file_name) {
                Ok(name) => scan.staged.push(StagedFile {
                    path: entry.path(),
                    name,
                }),
                Err(e) => scan.malformed.push(e),
            }
        }

        scan.staged
            .sort_by(|a, b| (a.name.created, &a.path).cmp(&(b.name.created, &b.path)));
        Ok(scan)
    }

    /// Copy `live` into a new staged file named after `name`.
    ///
    /// The copy is written under a `.tmp` name that scans skip, then linked
    /// into place, so a staged name never refers to a partial file. Returns
    /// None when a file with that name already exists, so the caller can pick
    /// another timestamp.
    pub async fn stage_copy(&self, live: &Path, name: &ObjectName) -> io::Result<Option<(PathBuf, u64)>> {
        let target = self.path_for(name);
        if tokio::fs::try_exists(&target).await? {
            return Ok(None);
        }
        let partial = self.dir.join(format!(".{}{}", name.staged_file_name(), PARTIAL_SUFFIX));

        let copied = async {
            let mut dest = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&partial)
                .await?;
            let mut src = tokio::fs::File::open(live).await?;
            let bytes = tokio::io::copy(&mut src, &mut dest).await?;
            dest.sync_all().await?;
            drop(dest);
            // Fails instead of replacing when the name was taken meanwhile.
            tokio::fs::hard_link(&partial, &target).await?;
            Ok::<u64, io::Error>(bytes)
        }
        .await;

        if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
            if remove_err.kind() != io::ErrorKind::NotFound {
                debug!(path = %partial.display(), error = %remove_err, "Failed to remove partial copy");
            }
        }

        match copied {
            Ok(bytes) => Ok(Some((target, bytes))),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn remove(&self, file: &StagedFile) -> io::Result<()> {
        tokio::fs::remove_file(&file.path).await
    }
}
