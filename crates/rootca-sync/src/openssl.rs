//! Thin wrapper around the external `openssl` executable.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Default program name, resolved through `$PATH`.
const DEFAULT_PROGRAM: &str = "openssl";

/// Handle to an `openssl` binary.
#[derive(Debug, Clone)]
pub struct OpenSsl {
    program: PathBuf,
}

impl Default for OpenSsl {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl OpenSsl {
    /// Use the executable at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Path of the executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run openssl with `args`, returning stdout on success.
    ///
    /// On failure the error carries the combined stdout/stderr text, which is
    /// where openssl reports what went wrong.
    pub async fn run(&self, args: &[OsString]) -> Result<Vec<u8>, String> {
        debug!(program = %self.program.display(), ?args, "running openssl");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program.display()))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(format!("openssl exited with {}: {}", output.status, text.trim()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let openssl = OpenSsl::new("/nonexistent/rootca/openssl");
        let err = openssl.run(&["version".into()]).await.unwrap_err();
        assert!(err.contains("failed to run"));
    }

    #[test]
    fn test_default_program() {
        assert_eq!(OpenSsl::default().program(), Path::new("openssl"));
    }
}
