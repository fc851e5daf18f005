use indexmap::IndexMap;
use std::env as stdenv;
use std::ffi::CString;
use std::io::{self, Write};
use std::path::PathBuf;

/// Mutable, insertion-ordered view of the process environment.
///
/// Variables keep the order in which they were first inserted, so
/// `getenv` listings and the exported `NAME=VALUE` array are stable
/// across mutations. The working directory travels with the store
/// because `cd` maintains `PWD` from it.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: IndexMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
}

impl Environment {
    /// Capture the inherited process environment, then make sure the
    /// shell's own contract variables exist: `PS1` (the prompt, default
    /// `>`) and `SUSHHOME` (seeded from `PWD`, consulted by the
    /// startup-rc reader).
    pub fn from_process() -> Self {
        let mut env = Self::from_pairs(stdenv::vars().map(|(k, v)| format!("{}={}", k, v)));
        env.inject_defaults();
        env
    }

    /// Build a store from `NAME=VALUE` strings, splitting on the first
    /// `=`. Entries without one are ignored.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vars = IndexMap::new();
        for pair in pairs {
            if let Some((name, value)) = pair.as_ref().split_once('=') {
                vars.insert(name.to_string(), value.to_string());
            }
        }
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Environment { vars, current_dir }
    }

    fn inject_defaults(&mut self) {
        if !self.exists("PS1") {
            self.set("PS1", ">");
        }
        if !self.exists("SUSHHOME") {
            let home = self
                .get("PWD")
                .map(str::to_string)
                .unwrap_or_else(|| self.current_dir.to_string_lossy().into_owned());
            self.set("SUSHHOME", home);
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Insert or update. An updated variable keeps its original position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Remove a variable; later entries shift up so order is preserved.
    pub fn remove(&mut self, name: &str) {
        self.vars.shift_remove(name);
    }

    /// Write every variable as a `NAME=VALUE` line in insertion order.
    pub fn print(&self, out: &mut dyn Write) -> io::Result<()> {
        for (name, value) in &self.vars {
            writeln!(out, "{}={}", name, value)?;
        }
        Ok(())
    }

    /// Materialize the store as `NAME=VALUE` C strings for a child
    /// launch. Entries that cannot be represented (embedded NUL) are
    /// skipped.
    pub fn export(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(name, value)| CString::new(format!("{}={}", name, value)).ok())
            .collect()
    }
}
