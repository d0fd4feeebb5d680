//! Local image lookup rooted at one directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::application::render::ResourceLocator;

/// Resolves image names relative to `root`.
///
/// A name is first tried as a relative path below the root; names that are
/// absolute or climb out with `..` are never read as given. Failing that, the
/// bare file name is tried directly under the root.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    root: PathBuf,
}

impl DirectoryLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let name = name.strip_prefix("file://").unwrap_or(name).trim();
        let path = Path::new(name);
        let mut candidates = Vec::with_capacity(2);

        if let Some(relative) = contained(path) {
            candidates.push(self.root.join(relative));
        } else {
            warn!(
                target = "infra::resources",
                op = "locate",
                name,
                "Refusing resource path outside the resource root"
            );
        }

        if let Some(file_name) = path.file_name() {
            let fallback = self.root.join(file_name);
            if !candidates.contains(&fallback) {
                candidates.push(fallback);
            }
        }
        candidates
    }
}

/// The normalised relative form of `path`, or `None` when it is absolute or
/// escapes its base.
fn contained(path: &Path) -> Option<PathBuf> {
    let mut normalised = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalised.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!normalised.as_os_str().is_empty()).then_some(normalised)
}

#[async_trait]
impl ResourceLocator for DirectoryLocator {
    async fn locate(&self, name: &str) -> Option<Bytes> {
        for candidate in self.candidates(name) {
            match tokio::fs::read(&candidate).await {
                Ok(bytes) => {
                    debug!(
                        target = "infra::resources",
                        op = "locate",
                        name,
                        path = %candidate.display(),
                        bytes = bytes.len(),
                        "Resolved local resource"
                    );
                    return Some(Bytes::from(bytes));
                }
                Err(err) => {
                    debug!(
                        target = "infra::resources",
                        op = "locate",
                        name,
                        path = %candidate.display(),
                        error = %err,
                        "Resource candidate unreadable"
                    );
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn reads_relative_paths_below_root() {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir(dir.path().join("img")).expect("mkdir");
        fs::write(dir.path().join("img/a.png"), b"png-bytes").expect("write");

        let locator = DirectoryLocator::new(dir.path());
        assert_eq!(
            locator.locate("img/a.png").await,
            Some(Bytes::from_static(b"png-bytes"))
        );
        assert_eq!(
            locator.locate("./img/a.png").await,
            Some(Bytes::from_static(b"png-bytes"))
        );
    }

    #[tokio::test]
    async fn falls_back_to_bare_file_name() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("figure.png"), b"fig").expect("write");

        let locator = DirectoryLocator::new(dir.path());
        assert_eq!(
            locator.locate("assets/figure.png").await,
            Some(Bytes::from_static(b"fig"))
        );
    }

    #[tokio::test]
    async fn never_reads_outside_root() {
        let outer = TempDir::new().expect("temp dir");
        let root = outer.path().join("root");
        fs::create_dir(&root).expect("mkdir");
        fs::write(outer.path().join("secret.png"), b"secret").expect("write");

        let locator = DirectoryLocator::new(&root);
        assert!(locator.locate("../secret.png").await.is_none());
        let absolute = outer.path().join("secret.png");
        assert!(
            locator
                .locate(absolute.to_str().expect("utf-8 path"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_resources_are_none() {
        let dir = TempDir::new().expect("temp dir");
        let locator = DirectoryLocator::new(dir.path());
        assert!(locator.locate("nope.png").await.is_none());
        assert!(locator.locate("").await.is_none());
    }
}
