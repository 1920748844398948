//! Isolated per-run workspaces.

use std::io;
use std::path::{Path, PathBuf};

use provisio_core::IacTool;
use tracing::{debug, info, warn};

/// A scratch directory holding one run's materialized IaC and tool artifacts.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    retain: bool,
}

impl Workspace {
    /// Create `root/{tool}-{deployment_id}-{random}`.
    pub async fn create(
        root: &Path,
        tool: IacTool,
        deployment_id: &str,
        retain: bool,
    ) -> io::Result<Self> {
        let name = format!("{tool}-{deployment_id}-{}", uuid::Uuid::new_v4().simple());
        let path = root.join(name);
        tokio::fs::create_dir_all(&path).await?;
        info!(workspace = %path.display(), "workspace created");
        Ok(Self { path, retain })
    }

    /// Re-open a workspace left behind by an earlier run, if it still exists.
    pub fn existing(path: &Path, retain: bool) -> Option<Self> {
        path.is_dir().then(|| Self {
            path: path.to_path_buf(),
            retain,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `contents` to `name` inside the workspace.
    pub async fn write(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let file = self.path.join(name);
        tokio::fs::write(&file, contents).await?;
        debug!(file = %file.display(), bytes = contents.len(), "materialized");
        Ok(file)
    }

    /// Read `name` if present.
    pub async fn read_optional(&self, name: &str) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.path.join(name)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove the workspace, or leave it in place when retaining.
    ///
    /// Returns the path when the directory was kept.
    pub async fn finish(self) -> Option<PathBuf> {
        if self.retain {
            warn!(workspace = %self.path.display(), "retaining workspace for inspection");
            return Some(self.path);
        }
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(workspace = %self.path.display(), "workspace removed"),
            Err(e) => warn!(workspace = %self.path.display(), error = %e, "workspace cleanup failed"),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_names_dir_after_tool_and_deployment() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), IacTool::Terraform, "dep-1", false)
            .await
            .unwrap();
        let name = ws.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("terraform-dep-1-"));
        assert!(ws.path().is_dir());
    }

    #[tokio::test]
    async fn two_runs_get_distinct_dirs() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path(), IacTool::Ansible, "d", false).await.unwrap();
        let b = Workspace::create(root.path(), IacTool::Ansible, "d", false).await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn finish_removes_unless_retained() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), IacTool::Terraform, "gone", false)
            .await
            .unwrap();
        ws.write("main.tf", "x").await.unwrap();
        let path = ws.path().to_path_buf();
        assert!(ws.finish().await.is_none());
        assert!(!path.exists());

        let kept = Workspace::create(root.path(), IacTool::Terraform, "kept", true)
            .await
            .unwrap();
        let path = kept.finish().await.unwrap();
        assert!(path.is_dir());
        assert!(Workspace::existing(&path, true).is_some());
    }

    #[tokio::test]
    async fn read_optional_missing_is_none() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), IacTool::Terraform, "r", false)
            .await
            .unwrap();
        assert!(ws.read_optional("terraform.tfstate").await.unwrap().is_none());
        ws.write("terraform.tfstate", "{}").await.unwrap();
        assert_eq!(
            ws.read_optional("terraform.tfstate").await.unwrap().as_deref(),
            Some("{}")
        );
    }
}
