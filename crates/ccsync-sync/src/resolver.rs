//! Channel resolution: turn a channel and its requirements into an ordered
//! operation list.
//!
//! Resolution is pure with respect to the committed snapshots it is given.
//! The file sets it observes are returned alongside the operations so the
//! caller decides whether they become the next baseline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use walkdir::WalkDir;

use ccsync_core::{Channel, ChannelKind, ChunkLimits, Preprocessor, Project, SyncOperation};

use crate::error::{Result, SyncError};

/// Directory-derived file sets per channel. Paths are relative to the
/// project root and `/`-separated.
pub type Snapshots = BTreeMap<String, BTreeSet<String>>;

/// Output of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Requirements first (depth-first, declaration order), then the channel.
    pub operations: Vec<SyncOperation>,
    /// Current directory file sets of every channel visited.
    pub observed: Snapshots,
}

/// Resolves channels of a single project.
#[derive(Clone)]
pub struct Resolver {
    project: Arc<Project>,
    preprocessor: Arc<dyn Preprocessor>,
    limits: ChunkLimits,
}

/// Mutable state threaded through one resolution.
struct Walk<'a> {
    committed: &'a Snapshots,
    stack: Vec<String>,
    operations: Vec<SyncOperation>,
    observed: Snapshots,
}

impl Resolver {
    pub fn new(project: Arc<Project>, preprocessor: Arc<dyn Preprocessor>, limits: ChunkLimits) -> Self {
        Self {
            project,
            preprocessor,
            limits,
        }
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Resolve a channel of either kind.
    pub fn resolve(&self, channel: &str, committed: &Snapshots) -> Result<Resolution> {
        let mut walk = Walk::new(committed);
        self.resolve_any(channel, &mut walk)?;
        Ok(walk.finish())
    }

    fn lookup(&self, name: &str) -> Result<&Channel> {
        self.project
            .channel(name)
            .ok_or_else(|| SyncError::UnknownChannel(name.to_string()))
    }

    fn resolve_any(&self, name: &str, walk: &mut Walk<'_>) -> Result<()> {
        match self.lookup(name)?.kind {
            ChannelKind::Library => self.visit_library(name, walk),
            ChannelKind::Script => self.visit_script(name, walk),
        }
    }

    fn visit_library(&self, name: &str, walk: &mut Walk<'_>) -> Result<()> {
        let channel = self.lookup(name)?;
        expect_kind(channel, ChannelKind::Library)?;
        walk.enter(name)?;

        // Requirements of a library are always libraries.
        for required in &channel.required_channels {
            self.visit_library(required, walk)?;
        }
        self.emit_channel(channel, walk)?;

        walk.leave();
        Ok(())
    }

    fn visit_script(&self, name: &str, walk: &mut Walk<'_>) -> Result<()> {
        let channel = self.lookup(name)?;
        expect_kind(channel, ChannelKind::Script)?;
        walk.enter(name)?;

        for required in &channel.required_channels {
            self.resolve_any(required, walk)?;
        }
        self.emit_channel(channel, walk)?;

        walk.leave();
        Ok(())
    }

    /// Emit a channel's own content followed by its deletions.
    fn emit_channel(&self, channel: &Channel, walk: &mut Walk<'_>) -> Result<()> {
        let root = self.project.root();

        for file in &channel.files {
            let text = read_source(&root.join(file))?;
            walk.operations.extend(SyncOperation::for_file(
                channel.kind,
                file,
                &self.preprocessor.process(&text),
                self.limits.file,
            ));
        }

        let mut current = BTreeSet::new();
        for directory in &channel.directories {
            for path in directory_files(root, directory)? {
                let text = read_source(&root.join(&path))?;
                walk.operations.extend(SyncOperation::for_file(
                    channel.kind,
                    &path,
                    &self.preprocessor.process(&text),
                    self.limits.directory,
                ));
                current.insert(path);
            }
        }

        if let Some(previous) = walk.committed.get(&channel.name) {
            let removed: Vec<String> = previous.difference(&current).cloned().collect();
            if !removed.is_empty() {
                tracing::debug!(channel = %channel.name, count = removed.len(), "files removed");
                walk.operations.push(SyncOperation::Deletion {
                    file_paths: removed,
                });
            }
        }

        walk.observed.insert(channel.name.clone(), current);
        Ok(())
    }
}

impl<'a> Walk<'a> {
    fn new(committed: &'a Snapshots) -> Self {
        Self {
            committed,
            stack: Vec::new(),
            operations: Vec::new(),
            observed: Snapshots::new(),
        }
    }

    /// Push a channel onto the requirement path, rejecting loops.
    ///
    /// Only the active path counts: a channel reached twice through
    /// different branches is not a cycle.
    fn enter(&mut self, name: &str) -> Result<()> {
        if let Some(start) = self.stack.iter().position(|n| n == name) {
            let mut cycle = self.stack[start..].to_vec();
            cycle.push(name.to_string());
            return Err(SyncError::CyclicDependency(cycle));
        }
        self.stack.push(name.to_string());
        Ok(())
    }

    fn leave(&mut self) {
        self.stack.pop();
    }

    fn finish(self) -> Resolution {
        Resolution {
            operations: self.operations,
            observed: self.observed,
        }
    }
}

fn expect_kind(channel: &Channel, expected: ChannelKind) -> Result<()> {
    if channel.kind == expected {
        Ok(())
    } else {
        Err(SyncError::ChannelKindMismatch {
            channel: channel.name.clone(),
            expected,
            actual: channel.kind,
        })
    }
}

/// Read a source file. Invalid UTF-8 is replaced rather than rejected.
fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|source| SyncError::FileSystem {
        path: path.to_path_buf(),
        source,
    })?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            tracing::warn!(path = %path.display(), "source is not valid UTF-8, decoding lossily");
            Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
        }
    }
}

/// Every regular file under `directory`, recursively, sorted by name.
///
/// Returned paths are `directory` joined with the relative path using `/`.
pub fn directory_files(root: &Path, directory: &str) -> Result<Vec<String>> {
    let base = root.join(directory);
    let prefix = directory.trim_end_matches('/');
    let mut files = Vec::new();

    for entry in WalkDir::new(&base)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| SyncError::FileSystem {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| base.clone()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(&base).unwrap_or(entry.path());
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(if prefix.is_empty() {
            components.join("/")
        } else {
            format!("{}/{}", prefix, components.join("/"))
        });
    }

    files.sort();
    Ok(files)
}
