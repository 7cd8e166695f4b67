//! Front-end ↔ debuggee path translation
//!
//! The debuggee reports files relative to its own root. The front end works
//! with absolute paths. Several source roots may be configured when one
//! debuggee imports code living under more than one front-end directory.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    /// Absolute, normalized; never empty
    roots: Vec<PathBuf>,
    base: PathBuf,
}

impl PathMapper {
    /// Relative roots and paths are resolved against `base`; with no roots
    /// `base` itself is the only root
    pub fn new(roots: Vec<PathBuf>, base: &Path) -> Self {
        let base = normalize(base);
        let mut roots: Vec<PathBuf> = roots.iter().map(|root| normalize(&base.join(root))).collect();
        if roots.is_empty() {
            roots.push(base.clone());
        }
        Self { roots, base }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Path the debuggee knows `client_path` by
    ///
    /// Relative to the first root containing it, else relative to the first
    /// root.
    pub fn to_debuggee(&self, client_path: &Path) -> String {
        let resolved = normalize(&self.base.join(client_path));
        let relative = self
            .roots
            .iter()
            .find_map(|root| resolved.strip_prefix(root).ok().map(Path::to_path_buf))
            .unwrap_or_else(|| relative_to(&self.roots[0], &resolved));
        relative.to_string_lossy().into_owned()
    }

    /// Front-end path for a file the debuggee reported
    ///
    /// Absolute paths pass through. With several roots the first one that
    /// actually contains the file wins; otherwise the first root is used.
    pub fn to_client(&self, debuggee_path: &str) -> PathBuf {
        let reported = Path::new(debuggee_path);
        if reported.is_absolute() {
            return reported.to_path_buf();
        }
        if self.roots.len() > 1
            && let Some(found) = self
                .roots
                .iter()
                .map(|root| root.join(reported))
                .find(|candidate| candidate.exists())
        {
            return found;
        }
        self.roots[0].join(reported)
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// `path` expressed relative to `root`, using `..` where needed
fn relative_to(root: &Path, path: &Path) -> PathBuf {
    let root_components: Vec<Component> = root.components().collect();
    let path_components: Vec<Component> = path.components().collect();
    let shared = root_components
        .iter()
        .zip(&path_components)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in shared..root_components.len() {
        relative.push("..");
    }
    for component in &path_components[shared..] {
        relative.push(component);
    }
    relative
}
