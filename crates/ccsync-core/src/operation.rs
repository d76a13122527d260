//! Sync operations: the unit of work streamed to a subscriber.
//!
//! A resolved channel is an ordered list of operations. Order matters end to
//! end: a [`SyncOperation::Chunk`] only makes sense after the
//! [`SyncOperation::Content`] for the same path.

use serde::{Deserialize, Serialize};

use crate::chunk::chunk;
use crate::project::ChannelKind;

/// One instruction for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncOperation {
    /// Write a file. Carries the first (or only) fragment of its text.
    Content {
        #[serde(rename = "channelKind")]
        kind: ChannelKind,
        #[serde(rename = "filePath")]
        file_path: String,
        data: String,
    },

    /// Append the next fragment to the file written by the preceding `Content`.
    Chunk {
        #[serde(rename = "filePath")]
        file_path: String,
        data: String,
    },

    /// Remove files that disappeared since the last committed snapshot.
    Deletion {
        #[serde(rename = "filePaths")]
        file_paths: Vec<String>,
    },
}

impl SyncOperation {
    /// Build the operations for one preprocessed file.
    ///
    /// The first fragment becomes a `Content`, the rest become `Chunk`s in order.
    pub fn for_file(kind: ChannelKind, file_path: &str, text: &str, max_bytes: usize) -> Vec<Self> {
        chunk(text, max_bytes)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                if i == 0 {
                    SyncOperation::Content {
                        kind,
                        file_path: file_path.to_string(),
                        data: piece.to_string(),
                    }
                } else {
                    SyncOperation::Chunk {
                        file_path: file_path.to_string(),
                        data: piece.to_string(),
                    }
                }
            })
            .collect()
    }

    /// The file this operation writes, if it writes one.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            SyncOperation::Content { file_path, .. } | SyncOperation::Chunk { file_path, .. } => {
                Some(file_path)
            }
            SyncOperation::Deletion { .. } => None,
        }
    }

    /// The text payload of a `Content` or `Chunk`.
    pub fn data(&self) -> Option<&str> {
        match self {
            SyncOperation::Content { data, .. } | SyncOperation::Chunk { data, .. } => Some(data),
            SyncOperation::Deletion { .. } => None,
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, SyncOperation::Content { .. })
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, SyncOperation::Chunk { .. })
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, SyncOperation::Deletion { .. })
    }
}

/// Reassemble file texts from an operation sequence, the way a receiver would.
///
/// Returns `(path, text)` pairs in first-write order. Deleted paths are dropped.
pub fn replay(operations: &[SyncOperation]) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = Vec::new();

    for op in operations {
        match op {
            SyncOperation::Content { file_path, data, .. } => {
                match files.iter_mut().find(|(path, _)| path == file_path) {
                    Some((_, text)) => *text = data.clone(),
                    None => files.push((file_path.clone(), data.clone())),
                }
            }
            SyncOperation::Chunk { file_path, data } => {
                if let Some((_, text)) = files.iter_mut().find(|(path, _)| path == file_path) {
                    text.push_str(data);
                }
            }
            SyncOperation::Deletion { file_paths } => {
                files.retain(|(path, _)| !file_paths.contains(path));
            }
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_is_single_content() {
        let ops = SyncOperation::for_file(ChannelKind::Library, "a.lua", "print(1)", 100);
        assert_eq!(
            ops,
            vec![SyncOperation::Content {
                kind: ChannelKind::Library,
                file_path: "a.lua".into(),
                data: "print(1)".into(),
            }]
        );
    }

    #[test]
    fn test_large_file_splits_into_chunks() {
        let text = "x".repeat(25);
        let ops = SyncOperation::for_file(ChannelKind::Script, "big.lua", &text, 10);

        assert_eq!(ops.len(), 3);
        assert!(ops[0].is_content());
        assert!(ops[1].is_chunk());
        assert!(ops[2].is_chunk());
        assert!(ops.iter().all(|op| op.file_path() == Some("big.lua")));
        assert_eq!(ops[2].data(), Some("xxxxx"));
    }

    #[test]
    fn test_replay_reassembles_and_deletes() {
        let mut ops = SyncOperation::for_file(ChannelKind::Library, "a.lua", "hello world", 4);
        ops.extend(SyncOperation::for_file(ChannelKind::Library, "b.lua", "b", 4));
        ops.push(SyncOperation::Deletion {
            file_paths: vec!["b.lua".into()],
        });

        assert_eq!(replay(&ops), vec![("a.lua".to_string(), "hello world".to_string())]);
    }

    #[test]
    fn test_wire_shape() {
        let op = SyncOperation::Content {
            kind: ChannelKind::Script,
            file_path: "main.lua".into(),
            data: "x".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["channelKind"], "script");
        assert_eq!(json["filePath"], "main.lua");

        let deletion = SyncOperation::Deletion {
            file_paths: vec!["gone.lua".into()],
        };
        let json = serde_json::to_value(&deletion).unwrap();
        assert_eq!(json["type"], "deletion");
        assert_eq!(json["filePaths"][0], "gone.lua");
    }
}
