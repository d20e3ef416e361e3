//! Locations in the remote tree.

use crate::error::{StoreError, StoreResult};
use std::fmt;

/// Characters a path segment may not contain.
const RESERVED: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// An addressable path in the remote tree.
///
/// A location is an ordered list of segments starting at the root.
/// Locations are cheap to clone and compare; two locations are equal
/// exactly when their segments are equal.
///
/// # Example
///
/// ```rust
/// use treesync_store::Location;
///
/// let posts = Location::root().child("posts").unwrap();
/// let post = posts.child("p1").unwrap();
/// assert_eq!(post.to_string(), "posts/p1");
/// assert_eq!(post.key(), Some("p1"));
/// assert_eq!(post.parent(), Some(posts));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Location {
    segments: Vec<String>,
}

impl Location {
    /// Returns the root location.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a `/`-separated path. Leading, trailing and repeated
    /// slashes are ignored, so `"/posts//p1/"` equals `"posts/p1"`.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let mut location = Self::root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            location = location.child(segment)?;
        }
        Ok(location)
    }

    /// Returns the child location one level below this one.
    pub fn child(&self, segment: &str) -> StoreResult<Self> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Returns the last segment, or `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns the parent location, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true for the root location.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &Location) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

/// Checks that a segment can be used as a key in the tree.
pub fn validate_segment(segment: &str) -> StoreResult<()> {
    if segment.is_empty() {
        return Err(StoreError::InvalidPath {
            segment: segment.to_string(),
            reason: "segment is empty",
        });
    }
    if segment.chars().any(|c| RESERVED.contains(&c) || c.is_control()) {
        return Err(StoreError::InvalidPath {
            segment: segment.to_string(),
            reason: "segment contains a reserved character",
        });
    }
    Ok(())
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({self})")
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        write!(f, "{}", self.segments.join("/"))
    }
}
