//! Shell resolution
//!
//! Picks the executable and arguments for a local session: an explicit path
//! from configuration, else `$SHELL`, else the platform default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The shell a local session runs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellInfo {
    /// Identifier derived from the executable name ("bash", "zsh", "pwsh")
    pub id: String,
    pub path: PathBuf,
}

impl ShellInfo {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Build from an executable path; the id is its file stem
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let id = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("shell")
            .to_lowercase();
        Self::new(id, path)
    }
}

#[cfg(target_os = "macos")]
const DEFAULT_SHELL_PATH: &str = "/bin/zsh";

#[cfg(all(unix, not(target_os = "macos")))]
const DEFAULT_SHELL_PATH: &str = "/bin/bash";

#[cfg(windows)]
const DEFAULT_SHELL_PATH: &str = "C:\\Windows\\System32\\cmd.exe";

/// Resolve the shell to run, preferring an explicit configured path
pub fn resolve_shell(configured: Option<&Path>) -> ShellInfo {
    match configured {
        Some(path) => ShellInfo::from_path(path),
        None => default_shell(),
    }
}

/// Get the default shell for the current platform
pub fn default_shell() -> ShellInfo {
    #[cfg(unix)]
    if let Ok(shell_path) = std::env::var("SHELL") {
        let path = PathBuf::from(&shell_path);
        if path.exists() {
            return ShellInfo::from_path(path);
        }
    }

    ShellInfo::from_path(DEFAULT_SHELL_PATH)
}

/// Shell arguments with optional profile loading
pub fn get_shell_args(shell_id: &str, load_profile: bool) -> Vec<String> {
    let args: &[&str] = match (shell_id, load_profile) {
        ("zsh", true) | ("bash", true) | ("fish", true) | ("sh", true) | ("dash", true) => {
            &["--login"]
        }
        ("zsh", false) => &["--no-rcs"],
        ("bash", false) => &["--noprofile", "--norc"],
        ("fish", false) => &["--no-config"],
        ("pwsh", true) | ("powershell", true) => &["-NoLogo", "-NoExit"],
        ("pwsh", false) | ("powershell", false) => &["-NoLogo", "-NoExit", "-NoProfile"],
        _ => &[],
    };
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_id() {
        assert_eq!(ShellInfo::from_path("/usr/bin/zsh").id, "zsh");
        assert_eq!(ShellInfo::from_path("C:/Program Files/PowerShell/7/pwsh.exe").id, "pwsh");
    }

    #[test]
    fn test_resolve_prefers_configured() {
        let shell = resolve_shell(Some(Path::new("/bin/sh")));
        assert_eq!(shell.id, "sh");
        assert_eq!(shell.path, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_get_shell_args_bash() {
        assert_eq!(get_shell_args("bash", true), vec!["--login"]);
        assert_eq!(get_shell_args("bash", false), vec!["--noprofile", "--norc"]);
    }

    #[test]
    fn test_get_shell_args_unknown() {
        assert!(get_shell_args("nu", true).is_empty());
        assert!(get_shell_args("sh", false).is_empty());
    }
}
