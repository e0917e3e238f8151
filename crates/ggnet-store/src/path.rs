//! Key → path derivation.
//!
//! A content-addressed key is hashed, hex-encoded, and cut into 5-character
//! segments that become nested directories. The full hex digest is the
//! filename. For SHA-1 that is:
//!
//!   <root>/68044/29f74/181a6/3c50c/3d81d/733a1/2f14a/353ff/6804429f74...353ff
//!
//! so no single directory ever holds more than 16^5 children.

use std::path::PathBuf;

use ggnet_core::crypto::{blake3_hex, sha1_hex};
use ggnet_core::PathScheme;

/// Hex characters per directory level.
pub const SEGMENT_LEN: usize = 5;

/// Where a key lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PathKey {
    /// Store root. Empty until the store sets it.
    pub root: PathBuf,
    /// Directory levels below the root, outermost first.
    pub segments: Vec<String>,
    /// File name inside the innermost directory.
    pub filename: String,
}

impl PathKey {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Segments joined with '/', e.g. "68044/29f74/...".
    pub fn pathname(&self) -> String {
        self.segments.join("/")
    }

    /// Directory that holds the file, root included.
    pub fn dir(&self) -> PathBuf {
        let mut dir = self.root.clone();
        dir.extend(&self.segments);
        dir
    }

    /// Path of the file relative to the root.
    pub fn full_path(&self) -> PathBuf {
        let mut path: PathBuf = self.segments.iter().collect();
        path.push(&self.filename);
        path
    }

    /// Path of the file, root included.
    pub fn full_path_with_root(&self) -> PathBuf {
        self.root.join(self.full_path())
    }

    /// First directory level below the root, if any.
    pub fn first_dir(&self) -> Option<PathBuf> {
        self.segments.first().map(|s| self.root.join(s))
    }
}

/// Function mapping a logical key to a root-less PathKey.
pub type PathTransform = fn(&str) -> PathKey;

/// SHA-1 content-addressed layout (8 levels of 5 hex chars).
pub fn cas_path_transform(key: &str) -> PathKey {
    shard_hex(sha1_hex(key.as_bytes()))
}

/// BLAKE3 content-addressed layout (12 levels of 5 hex chars).
pub fn blake3_path_transform(key: &str) -> PathKey {
    shard_hex(blake3_hex(key.as_bytes()))
}

/// Key used verbatim for both directory and filename.
pub fn identity_path_transform(key: &str) -> PathKey {
    PathKey {
        root: PathBuf::new(),
        segments: vec![key.to_string()],
        filename: key.to_string(),
    }
}

/// Split a hex digest into SEGMENT_LEN-sized directory names.
/// Trailing characters that do not fill a segment are not used as a level.
fn shard_hex(digest: String) -> PathKey {
    let segments = digest
        .as_bytes()
        .chunks_exact(SEGMENT_LEN)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    PathKey {
        root: PathBuf::new(),
        segments,
        filename: digest,
    }
}

pub fn transform_for(scheme: PathScheme) -> PathTransform {
    match scheme {
        PathScheme::Cas => cas_path_transform,
        PathScheme::Blake3 => blake3_path_transform,
        PathScheme::Identity => identity_path_transform,
    }
}
