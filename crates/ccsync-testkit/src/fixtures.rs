//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use ccsync_core::{Channel, ChannelKind, LuaPreprocessor, Passthrough, Preprocessor, Project};
use ccsync_sync::{SyncConfig, SyncEngine};

/// A temporary project tree.
///
/// Fixture helpers panic on I/O failure; they are only meant for tests.
pub struct ProjectFixture {
    dir: TempDir,
    channels: Vec<Channel>,
}

impl ProjectFixture {
    /// An empty tree with no channels.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
            channels: Vec::new(),
        }
    }

    /// `util` (library, `a.lua`) and `main` (script, `main.lua`, requires `util`).
    pub fn util_main() -> Self {
        Self::new()
            .with_file("a.lua", "return { answer = 42 }\n")
            .with_file("main.lua", "local util = require(\"util\")\nprint(util.answer)\n")
            .with_channel(Channel::new("util", ChannelKind::Library).file("a.lua"))
            .with_channel(
                Channel::new("main", ChannelKind::Script)
                    .file("main.lua")
                    .requires("util"),
            )
    }

    /// `lib` (library, directory `lib/` with `a.lua` and `b.lua`).
    pub fn directory_library() -> Self {
        Self::new()
            .with_file("lib/a.lua", "return 'a'\n")
            .with_file("lib/b.lua", "return 'b'\n")
            .with_channel(Channel::new("lib", ChannelKind::Library).directory("lib"))
    }

    pub fn with_file(self, path: &str, text: &str) -> Self {
        self.write(path, text);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Write a file, creating parent directories.
    pub fn write(&self, path: &str, text: &str) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(full, text).expect("write fixture file");
    }

    pub fn remove(&self, path: &str) {
        fs::remove_file(self.dir.path().join(path)).expect("remove fixture file");
    }

    /// The validated project for this tree.
    pub fn project(&self) -> Project {
        Project::new(self.dir.path(), self.channels.clone()).expect("valid fixture project")
    }

    /// An engine that passes sources through untouched.
    pub fn engine(&self, config: SyncConfig) -> Arc<SyncEngine> {
        self.engine_with(Arc::new(Passthrough), config)
    }

    /// An engine with the Lua preprocessor.
    pub fn lua_engine(&self, minify: bool, config: SyncConfig) -> Arc<SyncEngine> {
        self.engine_with(Arc::new(LuaPreprocessor::new(minify)), config)
    }

    pub fn engine_with(&self, preprocessor: Arc<dyn Preprocessor>, config: SyncConfig) -> Arc<SyncEngine> {
        SyncEngine::new(Arc::new(self.project()), preprocessor, config)
    }

    /// Write `project.json` describing this fixture and return its path.
    pub fn write_project_json(&self) -> PathBuf {
        let channels: Vec<_> = self
            .channels
            .iter()
            .map(|c| {
                json!({
                    "type": c.kind.as_str(),
                    "channelName": c.name,
                    "files": c.files,
                    "directories": c.directories,
                    "requiredChannels": c.required_channels,
                })
            })
            .collect();
        let doc = json!({ "rootDir": ".", "project": channels });

        let path = self.dir.path().join("project.json");
        fs::write(&path, serde_json::to_string_pretty(&doc).expect("serialize project"))
            .expect("write project.json");
        path
    }

    /// Write a minimal Lua root (`sync.lua`, `msgpack.lua`, `base64.lua`)
    /// under `lua/` and return its path.
    pub fn write_lua_root(&self) -> PathBuf {
        self.write("lua/sync.lua", "local msgpack = require(\"msgpack\")\nlocal base64 = require(\"base64\")\n");
        self.write("lua/msgpack.lua", "return { encode = function(v) return v end }\n");
        self.write("lua/base64.lua", "return { decode = function(v) return v end }\n");
        self.dir.path().join("lua")
    }
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}
