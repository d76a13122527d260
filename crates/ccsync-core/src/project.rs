//! Project: the root directory plus the ordered list of channels served from it.
//!
//! A project is loaded once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ProjectError;
use crate::validation::validate_channels;

/// Whether a channel is reusable code or a directly consumed script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Reusable code, required by other channels.
    Library,
    /// Leaf code run directly by a client.
    Script,
}

impl ChannelKind {
    /// Stable numeric tag used by canonical encoding.
    pub fn to_u8(self) -> u8 {
        match self {
            ChannelKind::Library => 0,
            ChannelKind::Script => 1,
        }
    }

    /// Wire name, as used by the project file.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Library => "library",
            ChannelKind::Script => "script",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, independently syncable unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Unique channel name.
    #[serde(rename = "channelName")]
    pub name: String,

    /// Library or script.
    #[serde(rename = "type")]
    pub kind: ChannelKind,

    /// Files relative to the project root, in declared order.
    #[serde(default)]
    pub files: Vec<String>,

    /// Directories relative to the project root, enumerated recursively.
    #[serde(default)]
    pub directories: Vec<String>,

    /// Channels resolved ahead of this one, in declared order.
    #[serde(default)]
    pub required_channels: Vec<String>,
}

impl Channel {
    /// Create an empty channel of the given kind.
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            files: Vec::new(),
            directories: Vec::new(),
            required_channels: Vec::new(),
        }
    }

    /// Add an explicitly listed file.
    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add a recursively enumerated directory.
    pub fn directory(mut self, path: impl Into<String>) -> Self {
        self.directories.push(path.into());
        self
    }

    /// Add a required channel.
    pub fn requires(mut self, channel: impl Into<String>) -> Self {
        self.required_channels.push(channel.into());
        self
    }

    pub fn is_library(&self) -> bool {
        self.kind == ChannelKind::Library
    }

    pub fn is_script(&self) -> bool {
        self.kind == ChannelKind::Script
    }
}

/// On-disk layout of `project.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFile {
    root_dir: PathBuf,
    project: Vec<Channel>,
}

/// An immutable, validated project.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
}

impl Project {
    /// Build a project from a root directory and its channels.
    ///
    /// Fails on duplicate names, unknown requirements or dependency cycles.
    pub fn new(root: impl Into<PathBuf>, channels: Vec<Channel>) -> Result<Self, ProjectError> {
        validate_channels(&channels)?;

        let index = channels
            .iter()
            .enumerate()
            .map(|(i, channel)| (channel.name.clone(), i))
            .collect();

        Ok(Self {
            root: root.into(),
            channels,
            index,
        })
    }

    /// Parse a project file body. `rootDir` is resolved against `base_dir`.
    pub fn from_json(json: &str, base_dir: &Path) -> Result<Self, ProjectError> {
        let file: ProjectFile = serde_json::from_str(json)?;
        Self::new(base_dir.join(file.root_dir), file.project)
    }

    /// Load a project file from disk.
    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let json = std::fs::read_to_string(path).map_err(|source| ProjectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json(&json, base_dir)
    }

    /// The directory every channel path is relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All channels in declared order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.index.get(name).map(|&i| &self.channels[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Channel names in declared order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }
}
