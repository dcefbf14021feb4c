use crate::config::ArtifactPattern;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// File name the submitted code is written to
pub const SCRIPT_NAME: &str = "script.py";

/// A per-execution working directory, removed on [`close`](Self::close) or drop
pub struct IsolatedWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl IsolatedWorkspace {
    /// Create a fresh, uniquely named directory under `base`
    pub fn new(base: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("ws-{}-", uuid::Uuid::new_v4().simple()))
            .tempdir_in(base)?;
        let path = dir.path().to_path_buf();
        debug!("[SANDBOX] Created workspace: {:?}", path);

        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the code to execute, returning the script path
    pub fn write_script(&self, code: &str) -> std::io::Result<PathBuf> {
        let script = self.path.join(SCRIPT_NAME);
        std::fs::write(&script, code)?;
        Ok(script)
    }

    /// First regular file directly inside the workspace that matches
    /// `pattern`, in name order. Symlinks are ignored so the code cannot
    /// point the copy at a file outside the workspace.
    pub fn find_artifact(&self, pattern: &ArtifactPattern) -> std::io::Result<Option<PathBuf>> {
        let mut matches = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let Ok(ft) = entry.file_type() else { continue };
            if !ft.is_file() || ft.is_symlink() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name != SCRIPT_NAME && pattern.matches(name) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches.into_iter().next())
    }

    /// Copy `source` out of the workspace into `output_dir` as
    /// `plot_<label>.<ext>`
    pub fn export_artifact(
        &self,
        source: &Path,
        output_dir: &Path,
        label: &str,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(output_dir)?;
        let dest = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => output_dir.join(format!("plot_{label}.{ext}")),
            None => output_dir.join(format!("plot_{label}")),
        };
        std::fs::copy(source, &dest)?;
        info!("[SANDBOX] Exported artifact: {:?} -> {:?}", source, dest);
        Ok(dest)
    }

    /// Remove the directory now, reporting failure instead of only logging it
    pub fn close(mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                dir.close()?;
                debug!("[SANDBOX] Cleaned up workspace: {:?}", self.path);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for IsolatedWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(
                    "[SANDBOX] Failed to cleanup workspace {:?}: {}",
                    self.path, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_and_removed() {
        let base = tempfile::tempdir().unwrap();
        let a = IsolatedWorkspace::new(base.path()).unwrap();
        let b = IsolatedWorkspace::new(base.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(base.path()));

        let (pa, pb) = (a.path().to_path_buf(), b.path().to_path_buf());
        a.write_script("print(1)").unwrap();
        a.close().unwrap();
        drop(b);
        assert!(!pa.exists());
        assert!(!pb.exists());
    }

    #[test]
    fn test_find_and_export_artifact() {
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let ws = IsolatedWorkspace::new(base.path()).unwrap();
        std::fs::write(ws.path().join("output.html"), "<html></html>").unwrap();
        std::fs::create_dir(ws.path().join("nested")).unwrap();
        std::fs::write(ws.path().join("nested").join("output.html"), "deep").unwrap();

        let found = ws
            .find_artifact(&ArtifactPattern::default())
            .unwrap()
            .unwrap();
        let dest = ws.export_artifact(&found, out.path(), "run1-1").unwrap();
        ws.close().unwrap();

        assert_eq!(dest, out.path().join("plot_run1-1.html"));
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "<html></html>");
    }

    #[test]
    fn test_extension_pattern_ignores_script() {
        let base = tempfile::tempdir().unwrap();
        let ws = IsolatedWorkspace::new(base.path()).unwrap();
        ws.write_script("x = 1").unwrap();
        std::fs::write(ws.path().join("b.png"), "b").unwrap();
        std::fs::write(ws.path().join("a.png"), "a").unwrap();

        let py = ws
            .find_artifact(&ArtifactPattern::Extension("py".to_string()))
            .unwrap();
        assert!(py.is_none());

        let png = ws
            .find_artifact(&ArtifactPattern::Extension("png".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(png.file_name().unwrap(), "a.png");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_not_an_artifact() {
        let base = tempfile::tempdir().unwrap();
        let outside = base.path().join("secret.html");
        std::fs::write(&outside, "secret").unwrap();
        let ws = IsolatedWorkspace::new(&base.path().join("ws")).unwrap();
        std::os::unix::fs::symlink(&outside, ws.path().join("output.html")).unwrap();

        assert!(ws
            .find_artifact(&ArtifactPattern::default())
            .unwrap()
            .is_none());
    }
}
