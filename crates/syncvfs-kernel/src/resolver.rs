//! Namespace resolver: normalization, relative resolution and symlinks.

use syncvfs_types::{ErrorCode, VfsError, VfsPath, VfsResult};

use crate::symlinks::SymlinkStore;

/// Default cap on symlink substitutions in one resolution.
pub const DEFAULT_MAX_SYMLINK_DEPTH: usize = 40;

/// Resolves guest-supplied paths to normalized store paths.
#[derive(Debug, Clone)]
pub struct Resolver {
    cwd: VfsPath,
    max_depth: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SYMLINK_DEPTH)
    }
}

impl Resolver {
    pub fn new(max_depth: usize) -> Self {
        Self {
            cwd: VfsPath::root(),
            max_depth,
        }
    }

    /// Normalize a raw path against the root.
    pub fn normalize(&self, raw: &str) -> VfsResult<VfsPath> {
        VfsPath::parse(raw)
    }

    /// Resolve `subpath` against `base`, or the working directory when there
    /// is no base. Absolute subpaths resolve from the root.
    pub fn resolve_relative(&self, base: Option<&VfsPath>, subpath: &str) -> VfsResult<VfsPath> {
        if subpath.starts_with('/') {
            return VfsPath::parse(subpath);
        }
        let base = base.unwrap_or(&self.cwd);
        VfsPath::parse(&format!("{}/{}", base.as_str(), subpath))
    }

    /// Substitute symlinks along `path`.
    ///
    /// Each traversed segment that names a symlink is replaced by its target
    /// (relative targets against the link's directory, absolute ones against
    /// the root) and the walk restarts. With `follow_final` false the last
    /// segment is left alone.
    pub fn resolve_symlinks(
        &self,
        path: &VfsPath,
        follow_final: bool,
        links: &SymlinkStore,
    ) -> VfsResult<VfsPath> {
        if links.is_empty() {
            return Ok(path.clone());
        }

        let mut current = path.clone();
        let mut substitutions = 0usize;
        while let Some(next) = substitute_first(&current, follow_final, links)? {
            substitutions += 1;
            if substitutions > self.max_depth {
                return Err(VfsError::new(
                    ErrorCode::Loop,
                    format!("{}: more than {} symlink substitutions", path, self.max_depth),
                ));
            }
            current = next;
        }
        Ok(current)
    }

    pub fn cwd(&self) -> &VfsPath {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: VfsPath) {
        self.cwd = cwd;
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// Replace the first symlink along `path`, or `None` if there is none.
fn substitute_first(
    path: &VfsPath,
    follow_final: bool,
    links: &SymlinkStore,
) -> VfsResult<Option<VfsPath>> {
    let segments: Vec<&str> = path.segments().collect();
    let mut prefix = VfsPath::root();

    for (i, segment) in segments.iter().enumerate() {
        let candidate = prefix.child(segment)?;
        if i + 1 == segments.len() && !follow_final {
            break;
        }
        if let Some(target) = links.get(&candidate) {
            let mut rewritten = if target.starts_with('/') {
                target.to_string()
            } else {
                format!("{}/{}", prefix.as_str(), target)
            };
            for rest in &segments[i + 1..] {
                rewritten.push('/');
                rewritten.push_str(rest);
            }
            tracing::trace!(link = %candidate, target = %target, "symlink substituted");
            return VfsPath::parse(&rewritten).map(Some);
        }
        prefix = candidate;
    }
    Ok(None)
}
