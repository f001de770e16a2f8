//! Normalized VFS paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, VfsError};

/// A normalized, slash-separated path relative to the VFS root.
///
/// Invariants: no leading or trailing slash, no empty segments, no `.` or
/// `..` segments, no NUL bytes. The empty string is the root.
///
/// ```
/// use syncvfs_types::VfsPath;
///
/// let p = VfsPath::parse("/a/./b//c/../d/").unwrap();
/// assert_eq!(p.as_str(), "a/b/d");
/// assert!(VfsPath::parse("/").unwrap().is_root());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VfsPath(String);

impl VfsPath {
    /// The root path.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and lexically normalize a path.
    ///
    /// Leading slashes are ignored; `..` pops a segment. Climbing above the
    /// root or embedding a NUL byte is an `InvalidArgument`.
    pub fn parse(raw: &str) -> Result<Self, VfsError> {
        if raw.contains('\0') {
            return Err(VfsError::new(
                ErrorCode::InvalidArgument,
                format!("path contains NUL byte: {:?}", raw),
            ));
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(VfsError::new(
                            ErrorCode::InvalidArgument,
                            format!("path escapes root: {}", raw),
                        ));
                    }
                }
                s => segments.push(s),
            }
        }
        Ok(Self(segments.join("/")))
    }

    /// The path as a string, without a leading slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the path's segments. The root has none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Final segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        })
    }

    /// Append one already-normalized path to this one.
    pub fn join(&self, other: &VfsPath) -> VfsPath {
        if self.is_root() {
            return other.clone();
        }
        if other.is_root() {
            return self.clone();
        }
        Self(format!("{}/{}", self.0, other.0))
    }

    /// Append a single name. Rejects names that are not one plain segment.
    pub fn child(&self, name: &str) -> Result<VfsPath, VfsError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
        {
            return Err(VfsError::new(
                ErrorCode::InvalidArgument,
                format!("invalid entry name: {:?}", name),
            ));
        }
        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, name)))
        }
    }

    /// Segment-wise prefix test. Every path starts with the root.
    pub fn starts_with(&self, prefix: &VfsPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        match self.0.strip_prefix(prefix.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    /// Remove a segment-wise prefix, returning the remainder.
    pub fn strip_prefix(&self, prefix: &VfsPath) -> Option<VfsPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        let rest = &self.0[prefix.0.len()..];
        Some(Self(rest.trim_start_matches('/').to_string()))
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl TryFrom<String> for VfsPath {
    type Error = VfsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VfsPath> for String {
    fn from(value: VfsPath) -> Self {
        value.0
    }
}

impl AsRef<str> for VfsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
