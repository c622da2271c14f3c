//! Locating the interpreter front-end and the shared libraries it needs.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ExecutableHints;
use crate::{AppError, Result};

/// Find the worker executable.
///
/// Search order:
/// 1. `hints.install_dir` joined with `bin_subdir` and `program`.
/// 2. The `hints.home_env` environment variable, if set and non-blank.
/// 3. On Windows, the `InstallPath` value of `hints.registry_key` under
///    `HKCU` and then `HKLM`.
/// 4. `PATH`.
///
/// An explicit location that lacks the program is an error rather than a
/// reason to keep searching.
///
/// # Errors
///
/// Returns `AppError::NotInstalled` describing where the program was expected.
pub fn locate_executable(hints: &ExecutableHints) -> Result<PathBuf> {
    if let Some(dir) = &hints.install_dir {
        let path = program_under(hints, dir);
        if path.is_file() {
            debug!(path = %path.display(), "found executable in configured install_dir");
            return Ok(path);
        }
        return Err(AppError::NotInstalled(format!(
            "install directory {} does not contain {}",
            dir.display(),
            path.display()
        )));
    }

    if let Some(home) = env_dir(&hints.home_env) {
        let path = program_under(hints, &home);
        if path.is_file() {
            debug!(
                path = %path.display(),
                var = hints.home_env.as_str(),
                "found executable via environment"
            );
            return Ok(path);
        }
        return Err(AppError::NotInstalled(format!(
            "{} is set to {} but {} does not exist",
            hints.home_env,
            home.display(),
            path.display()
        )));
    }

    #[cfg(windows)]
    if let Some(path) = registry::lookup(hints) {
        return Ok(path);
    }

    match which::which(&hints.program) {
        Ok(path) => {
            debug!(path = %path.display(), "found executable on PATH");
            Ok(path)
        }
        Err(err) => Err(AppError::NotInstalled(format!(
            "could not find {} via install_dir, {}, or PATH ({err}); is R installed?",
            hints.program, hints.home_env
        ))),
    }
}

fn program_under(hints: &ExecutableHints, root: &Path) -> PathBuf {
    root.join(&hints.bin_subdir).join(&hints.program)
}

fn env_dir(name: &str) -> Option<PathBuf> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

/// Verify that every library in `names` can be loaded by the dynamic loader.
///
/// Plain names such as `sodium` are expanded to the platform file name
/// (`libsodium.so`, `libsodium.dylib`, `sodium.dll`, and on Windows also
/// `libsodium.dll`). Names containing a `.` are handed to the loader as
/// given, e.g. `libsodium.so.23`.
///
/// # Errors
///
/// Returns `AppError::NotInstalled` naming the first missing library.
pub fn check_libraries(names: &[String]) -> Result<()> {
    for name in names {
        let loaded = library_candidates(name)
            .iter()
            .any(|candidate| loads(candidate, name));
        if !loaded {
            return Err(AppError::NotInstalled(format!(
                "the worker's HTTP stack requires the shared library {name}, which the dynamic \
                 loader could not find; install it (e.g. `apt-get install lib{name}-dev`) \
                 and try again"
            )));
        }
        debug!(library = name.as_str(), "required library found");
    }
    Ok(())
}

fn library_candidates(name: &str) -> Vec<OsString> {
    if name.contains('.') {
        return vec![OsString::from(name)];
    }
    let mut candidates = vec![libloading::library_filename(name)];
    if cfg!(windows) {
        candidates.push(OsString::from(format!("lib{name}.dll")));
    }
    candidates
}

/// Ask the loader for `file`. The handle is closed again right away.
#[allow(unsafe_code)]
fn loads(file: &OsStr, name: &str) -> bool {
    // Loading runs the library's initializers; the required libraries are
    // plain C libraries without global constructors of note.
    match unsafe { libloading::Library::new(file) } {
        Ok(_library) => true,
        Err(err) => {
            debug!(library = name, file = %file.to_string_lossy(), %err, "library did not load");
            false
        }
    }
}

#[cfg(windows)]
mod registry {
    use std::path::PathBuf;
    use std::process::Command;

    use tracing::{debug, warn};

    use super::{parse_reg_query_value, program_under};
    use crate::config::ExecutableHints;

    const VALUE_NAME: &str = "InstallPath";

    pub(super) fn lookup(hints: &ExecutableHints) -> Option<PathBuf> {
        for hive in ["HKCU", "HKLM"] {
            let key = format!(r"{hive}\{}", hints.registry_key);
            let output = match Command::new("reg")
                .args(["query", &key, "/v", VALUE_NAME])
                .output()
            {
                Ok(output) if output.status.success() => output,
                Ok(_) => {
                    debug!(key = key.as_str(), "registry key not present");
                    continue;
                }
                Err(err) => {
                    debug!(key = key.as_str(), %err, "failed to run reg query");
                    continue;
                }
            };

            let stdout = String::from_utf8_lossy(&output.stdout);
            let Some(install_path) = parse_reg_query_value(&stdout, VALUE_NAME) else {
                continue;
            };

            let path = program_under(hints, &PathBuf::from(&install_path));
            if path.is_file() {
                debug!(path = %path.display(), key = key.as_str(), "found executable via registry");
                return Some(path);
            }
            warn!(
                key = key.as_str(),
                install_path = install_path.as_str(),
                "registry InstallPath does not contain the executable; ignoring"
            );
        }
        None
    }
}

/// Extract a string value from `reg query <key> /v <value_name>` output.
#[cfg(any(test, windows))]
fn parse_reg_query_value(output: &str, value_name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(value_name)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim_start();
        let data = rest
            .strip_prefix("REG_EXPAND_SZ")
            .or_else(|| rest.strip_prefix("REG_SZ"))?
            .trim();
        (!data.is_empty()).then(|| data.to_owned())
    })
}
