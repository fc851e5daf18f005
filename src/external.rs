use crate::env::Environment;
use std::path::{Path, PathBuf};

/// Resolve a command name to an executable path the way a shell would.
///
/// - Absolute path: returned if it exists.
/// - `./`-prefixed or multi-component relative path: returned if it
///   exists relative to the current directory.
/// - Single component: each directory of the store's `PATH` is searched
///   in order and the first existing match wins.
/// - Empty name or no match: `None`.
///
/// Resolution consults the shell's own environment store, not the
/// process environment, so `setenv PATH ...` takes effect immediately.
pub fn resolve_program(env: &Environment, name: &str) -> Option<PathBuf> {
    let path = Path::new(name);

    if path.is_absolute() {
        return existing(path);
    }

    if name.starts_with("./") && path.exists() {
        return Some(path.to_path_buf());
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => None,
        (Some(_), None) => {
            let search_paths = env.get("PATH")?;
            find_in_path(search_paths, name)
        }
        _ => existing(path),
    }
}

fn find_in_path(search_paths: &str, cmd: &str) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        let candidate = dir.join(cmd);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn existing(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}
