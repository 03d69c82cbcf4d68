//! Local terminal support
//!
//! Runs shells in native pseudo-terminals behind the
//! [`ShellBackend`](crate::backend::ShellBackend) seam.

pub mod backend;
pub mod pty;
pub mod shell;

pub use backend::{LocalShellBackend, NativePtySpawner};
pub use pty::{PtyConfig, PtyError, PtyHandle, PtyParts};
pub use shell::{default_shell, get_shell_args, resolve_shell, ShellInfo};
