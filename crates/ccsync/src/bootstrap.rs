//! Bootstrap script bundling.
//!
//! The client fetches a single Lua script. The entry point and its helper
//! modules are inlined into one chunk with a small module loader; any
//! `require` of a name that is not bundled falls through to the host.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{Result, ServerError};

/// Bundles an entry script with named modules from one directory.
#[derive(Debug, Clone)]
pub struct Bundler {
    root: PathBuf,
    entry: String,
    modules: Vec<(String, String)>,
}

impl Bundler {
    /// `sync.lua` with `msgpack.lua` and `base64.lua` from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entry: "sync.lua".to_string(),
            modules: vec![
                ("msgpack".to_string(), "msgpack.lua".to_string()),
                ("base64".to_string(), "base64.lua".to_string()),
            ],
        }
    }

    pub fn with_entry(mut self, file: impl Into<String>) -> Self {
        self.entry = file.into();
        self
    }

    /// Bundle `file` under the module name `name`.
    pub fn with_module(mut self, name: impl Into<String>, file: impl Into<String>) -> Self {
        self.modules.push((name.into(), file.into()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read every source and produce the bundled script.
    pub fn bundle(&self) -> Result<String> {
        let entry = self.read(&self.entry)?;
        let mut modules = Vec::with_capacity(self.modules.len());
        for (name, file) in &self.modules {
            modules.push((name.as_str(), self.read(file)?));
        }
        Ok(render(&entry, &modules))
    }

    fn read(&self, file: &str) -> Result<String> {
        let path = self.root.join(file);
        std::fs::read_to_string(&path).map_err(|source| ServerError::Bootstrap { path, source })
    }
}

fn render(entry: &str, modules: &[(&str, String)]) -> String {
    let mut out = String::new();
    out.push_str("local __bundle_modules = {}\n");
    out.push_str("local __bundle_loaded = {}\n");
    out.push_str("local __host_require = require\n");
    out.push_str("local function __bundle_require(name)\n");
    out.push_str("  local loaded = __bundle_loaded[name]\n");
    out.push_str("  if loaded ~= nil then return loaded end\n");
    out.push_str("  local loader = __bundle_modules[name]\n");
    out.push_str("  if loader == nil then return __host_require(name) end\n");
    out.push_str("  local value = loader(name)\n");
    out.push_str("  if value == nil then value = true end\n");
    out.push_str("  __bundle_loaded[name] = value\n");
    out.push_str("  return value\n");
    out.push_str("end\n");

    for (name, source) in modules {
        // Writing to a String cannot fail.
        let _ = writeln!(out, "__bundle_modules[{}] = function(...)", lua_string(name));
        out.push_str("local require = __bundle_require\n");
        out.push_str(source);
        if !source.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("end\n");
    }

    out.push_str("return (function(...)\n");
    out.push_str("local require = __bundle_require\n");
    out.push_str(entry);
    if !entry.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("end)(...)\n");
    out
}

/// Quote `text` as a Lua string literal.
///
/// Lua strings are byte strings, so UTF-8 passes through; quotes,
/// backslashes and control bytes are escaped.
fn lua_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\{:03}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
