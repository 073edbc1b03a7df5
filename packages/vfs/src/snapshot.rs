//! Filesystem snapshots used to seed a session.
//!
//! The serialized shape mirrors the directory tree directly:
//!
//! ```json
//! {
//!   "dir": {
//!     "home": { "dir": { "user": { "dir": {} } } },
//!     "motd": { "source": "hello\n" },
//!     "blob": { "source": { "base64": "AAEC" } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while turning a snapshot into a filesystem.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A file's base64 payload did not decode.
    #[error("invalid base64 content for {path}: {message}")]
    InvalidBase64 { path: String, message: String },

    /// The snapshot document was not valid JSON for this shape.
    #[error("invalid snapshot document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of a file in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileSource {
    /// UTF-8 text, stored as its bytes.
    Text(String),
    /// Arbitrary bytes, base64 encoded.
    Base64 { base64: String },
}

impl FileSource {
    pub(crate) fn to_bytes(&self, path: &str) -> Result<Vec<u8>, SnapshotError> {
        match self {
            FileSource::Text(text) => Ok(text.as_bytes().to_vec()),
            FileSource::Base64 { base64 } => {
                STANDARD
                    .decode(base64)
                    .map_err(|e| SnapshotError::InvalidBase64 {
                        path: path.to_string(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

/// A node in a snapshot tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotEntry {
    Directory { dir: BTreeMap<String, SnapshotEntry> },
    File { source: FileSource },
}

/// A directory tree with file contents, used to seed the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsSnapshot {
    pub dir: BTreeMap<String, SnapshotEntry>,
}

impl FsSnapshot {
    /// An empty root directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a snapshot document.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add a directory (and any missing parents) at a `/`-separated path.
    pub fn with_directory(mut self, path: &str) -> Self {
        self.directory_mut(path);
        self
    }

    /// Add a text file, creating missing parent directories.
    pub fn with_file(mut self, path: &str, contents: impl Into<String>) -> Self {
        self.insert_file(path, FileSource::Text(contents.into()));
        self
    }

    /// Add a binary file, creating missing parent directories.
    pub fn with_bytes(mut self, path: &str, contents: &[u8]) -> Self {
        self.insert_file(
            path,
            FileSource::Base64 {
                base64: STANDARD.encode(contents),
            },
        );
        self
    }

    fn insert_file(&mut self, path: &str, source: FileSource) {
        let (parent, name) = match path.trim_matches('/').rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", path.trim_matches('/')),
        };
        if name.is_empty() {
            return;
        }
        if let Some(dir) = self.directory_mut(parent) {
            dir.insert(name.to_string(), SnapshotEntry::File { source });
        }
    }

    /// The directory at `path`, created along the way. A file in the way
    /// is replaced by a directory.
    fn directory_mut(&mut self, path: &str) -> Option<&mut BTreeMap<String, SnapshotEntry>> {
        let mut current = &mut self.dir;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if let Some(SnapshotEntry::File { .. }) = current.get(segment) {
                current.remove(segment);
            }
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| SnapshotEntry::Directory {
                    dir: BTreeMap::new(),
                });
            let SnapshotEntry::Directory { dir } = entry else {
                return None;
            };
            current = dir;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_literals::btree;

    #[test]
    fn parses_directory_and_file_shapes() {
        let snapshot = FsSnapshot::from_json(
            r#"{"dir": {
                "home": {"dir": {"user": {"dir": {}}}},
                "motd": {"source": "hello"},
                "blob": {"source": {"base64": "AAEC"}}
            }}"#,
        )
        .unwrap();

        assert_eq!(
            snapshot.dir.get("motd"),
            Some(&SnapshotEntry::File {
                source: FileSource::Text("hello".to_string())
            })
        );
        match snapshot.dir.get("blob") {
            Some(SnapshotEntry::File { source }) => {
                assert_eq!(source.to_bytes("blob").unwrap(), vec![0, 1, 2]);
            }
            other => panic!("expected file, got {:?}", other),
        }
        assert!(matches!(
            snapshot.dir.get("home"),
            Some(SnapshotEntry::Directory { .. })
        ));
    }

    #[test]
    fn rejects_bad_base64() {
        let source = FileSource::Base64 {
            base64: "***".to_string(),
        };
        let err = source.to_bytes("bad.bin").unwrap_err();
        assert!(err.to_string().contains("bad.bin"));
    }

    #[test]
    fn builders_create_parents() {
        let snapshot = FsSnapshot::new()
            .with_directory("home/user")
            .with_file("etc/motd", "hi");

        let expected = FsSnapshot {
            dir: btree! {
                "home".to_string() => SnapshotEntry::Directory {
                    dir: btree! {
                        "user".to_string() => SnapshotEntry::Directory { dir: BTreeMap::new() },
                    },
                },
                "etc".to_string() => SnapshotEntry::Directory {
                    dir: btree! {
                        "motd".to_string() => SnapshotEntry::File {
                            source: FileSource::Text("hi".to_string()),
                        },
                    },
                },
            },
        };
        assert_eq!(snapshot, expected);
    }

    #[test]
    fn directory_replaces_file_in_the_way() {
        let snapshot = FsSnapshot::new()
            .with_file("etc", "not a directory")
            .with_file("etc/motd", "hi");

        let expected = FsSnapshot {
            dir: btree! {
                "etc".to_string() => SnapshotEntry::Directory {
                    dir: btree! {
                        "motd".to_string() => SnapshotEntry::File {
                            source: FileSource::Text("hi".to_string()),
                        },
                    },
                },
            },
        };
        assert_eq!(snapshot, expected);
    }

    #[test]
    fn serializes_back_to_same_shape() {
        let snapshot = FsSnapshot::new().with_directory("tmp");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json, serde_json::json!({"dir": {"tmp": {"dir": {}}}}));
    }
}
