//! Query transport: shelling out to the `gh` CLI.
//!
//! The `gh` binary owns authentication and the wire protocol; this layer
//! only launches it and hands raw payloads back to the client for
//! classification.

use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The subprocess could not be launched or its output not collected.
    #[error("failed to run gh: {0}")]
    Spawn(#[from] std::io::Error),
    /// `gh` ran but exited non-zero. Keeps both streams: stderr drives
    /// error classification, stdout may still hold a partial payload.
    #[error("gh exited non-zero: {}", stderr.trim())]
    Failed { stderr: String, stdout: String },
}

/// One logical round trip to the forge.
pub trait QueryTransport {
    /// Execute a GraphQL document with named string parameters, returning
    /// the raw response payload on success.
    fn run_query(&self, query: &str, variables: &[(&str, String)]) -> Result<String, TransportError>;

    /// Probe the REST rate-limit endpoint, returning its raw payload.
    fn fetch_rate_limit(&self) -> Result<String, TransportError>;
}

/// Production transport backed by `gh api`.
pub struct GhTransport;

impl GhTransport {
    fn collect(mut cmd: Command) -> Result<String, TransportError> {
        let output = cmd.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            Err(TransportError::Failed {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                stdout,
            })
        }
    }
}

impl QueryTransport for GhTransport {
    fn run_query(&self, query: &str, variables: &[(&str, String)]) -> Result<String, TransportError> {
        let mut cmd = Command::new("gh");
        cmd.args(["api", "graphql"]);
        cmd.arg("-f").arg(format!("query={query}"));
        for (key, value) in variables {
            cmd.arg("-f").arg(format!("{key}={value}"));
        }
        Self::collect(cmd)
    }

    fn fetch_rate_limit(&self) -> Result<String, TransportError> {
        let mut cmd = Command::new("gh");
        cmd.args(["api", "rate_limit"]);
        Self::collect(cmd)
    }
}
