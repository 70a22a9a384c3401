//! Artifact synchronizer
//!
//! Uploads a local script (or a directory of them) into the remote working
//! directory right before it is run. Nothing is cached between runs.

use std::path::{Path, PathBuf};

use gb_core::command::{join_remote, remote_path_expr};
use gb_core::{GbError, Remote};

/// Directory names never uploaded
const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    ".ipynb_checkpoints",
    ".pytest_cache",
    ".mypy_cache",
    ".git",
    "target",
];

/// File extensions never uploaded
const EXCLUDED_EXTENSIONS: &[&str] = &["pyc", "pyo"];

/// What a sync uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedArtifact {
    /// Name of the artifact inside the remote working directory
    pub remote_name: String,
    pub files: usize,
    pub bytes: u64,
}

pub struct ArtifactSync<'a, R: Remote + ?Sized> {
    remote: &'a R,
}

impl<'a, R: Remote + ?Sized> ArtifactSync<'a, R> {
    pub fn new(remote: &'a R) -> Self {
        Self { remote }
    }

    /// Upload `local` by basename into the working directory.
    ///
    /// Returns [`GbError::ResourceNotFound`] without touching the network when
    /// `local` does not exist.
    pub async fn sync(&self, local: &Path) -> Result<SyncedArtifact, GbError> {
        let metadata = match tokio::fs::metadata(local).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GbError::ResourceNotFound(local.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let absolute = tokio::fs::canonicalize(local).await?;
        let remote_name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| GbError::ResourceNotFound(local.to_path_buf()))?;

        let files = if metadata.is_dir() {
            collect_tree(&absolute)?
        } else {
            vec![(remote_name.clone(), absolute.clone())]
        };

        let working_dir = &self.remote.target().working_dir;
        let mut dirs: Vec<String> = vec![working_dir.clone()];
        if metadata.is_dir() {
            dirs.push(join_remote(working_dir, &remote_name));
        }
        for (relative, _) in &files {
            if let Some((parent, _)) = relative.rsplit_once('/') {
                let dir = join_remote(working_dir, parent);
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        let mkdir = format!(
            "mkdir -p {}",
            dirs.iter()
                .map(|d| remote_path_expr(d))
                .collect::<Vec<_>>()
                .join(" ")
        );
        let prepared = self.remote.exec(&mkdir, false).await?;
        if !prepared.success() {
            return Err(GbError::RemoteStep {
                step: format!("creating {}", working_dir),
                code: prepared.exit_code,
                detail: prepared.stderr_tail.trim().to_string(),
            });
        }

        let mut bytes = 0u64;
        for (relative, path) in &files {
            let contents = tokio::fs::read(path).await?;
            bytes += contents.len() as u64;
            let remote_path = join_remote(working_dir, relative);
            tracing::debug!("Uploading {} -> {}", path.display(), remote_path);
            self.remote.upload(&remote_path, contents).await?;
        }

        tracing::info!(
            "Synced {} ({} file(s), {} bytes) to {}",
            remote_name,
            files.len(),
            bytes,
            working_dir
        );

        Ok(SyncedArtifact {
            remote_name,
            files: files.len(),
            bytes,
        })
    }
}

fn is_excluded(path: &Path, is_dir: bool) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if is_dir {
        EXCLUDED_DIRS.iter().any(|d| *d == name)
    } else {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                EXCLUDED_EXTENSIONS.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }
}

/// Every uploadable file under `root`, as `(<root name>/<relative>, absolute)`
fn collect_tree(root: &Path) -> Result<Vec<(String, PathBuf)>, GbError> {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut out = Vec::new();
    let mut stack = vec![(root.to_path_buf(), root_name)];

    while let Some((dir, prefix)) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = format!("{}/{}", prefix, name);

            if file_type.is_dir() {
                if !is_excluded(&path, true) {
                    stack.push((path, relative));
                }
            } else if file_type.is_file() && !is_excluded(&path, false) {
                out.push((relative, path));
            }
        }
    }

    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_never_touches_remote() {
        let remote = FakeRemote::new();
        let sync = ArtifactSync::new(&remote);

        let err = sync
            .sync(Path::new("/definitely/not/here/train.py"))
            .await
            .unwrap_err();

        assert!(matches!(err, GbError::ResourceNotFound(_)));
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_file_uploaded_by_basename() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("train.py");
        std::fs::write(&script, b"print('hi')\n").unwrap();

        let remote = FakeRemote::new();
        let synced = ArtifactSync::new(&remote).sync(&script).await.unwrap();

        assert_eq!(synced.remote_name, "train.py");
        assert_eq!(synced.files, 1);
        assert_eq!(remote.commands(), vec!["mkdir -p /srv/work".to_string()]);
        let uploads = remote.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "/srv/work/train.py");
        assert_eq!(uploads[0].1, b"print('hi')\n");
    }

    #[tokio::test]
    async fn test_directory_skips_build_caches() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        std::fs::create_dir_all(project.join("__pycache__")).unwrap();
        std::fs::create_dir_all(project.join("pkg")).unwrap();
        std::fs::write(project.join("main.py"), b"main").unwrap();
        std::fs::write(project.join("pkg").join("util.py"), b"util").unwrap();
        std::fs::write(project.join("pkg").join("util.pyc"), b"junk").unwrap();
        std::fs::write(project.join("__pycache__").join("main.cpython-311.pyc"), b"junk").unwrap();

        let remote = FakeRemote::new();
        let synced = ArtifactSync::new(&remote).sync(&project).await.unwrap();

        assert_eq!(synced.remote_name, "proj");
        let paths: Vec<String> = remote.uploads().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "/srv/work/proj/main.py".to_string(),
                "/srv/work/proj/pkg/util.py".to_string(),
            ]
        );
        assert_eq!(
            remote.commands(),
            vec!["mkdir -p /srv/work /srv/work/proj /srv/work/proj/pkg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_refused_mkdir_is_a_remote_failure() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("train.py");
        std::fs::write(&script, b"pass\n").unwrap();

        let remote = FakeRemote::new();
        remote.push_exit(1, "", "mkdir: cannot create directory '/srv/work': Permission denied");
        let err = ArtifactSync::new(&remote).sync(&script).await.unwrap_err();

        assert!(matches!(err, GbError::RemoteStep { code: 1, .. }));
        assert!(!err.is_transport());
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("Permission denied"));
        assert!(remote.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_every_call_uploads_again() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("eval.py");
        std::fs::write(&script, b"v1").unwrap();

        let remote = FakeRemote::new();
        let sync = ArtifactSync::new(&remote);
        sync.sync(&script).await.unwrap();
        std::fs::write(&script, b"v2").unwrap();
        sync.sync(&script).await.unwrap();

        let uploads = remote.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[1].1, b"v2");
    }
}
