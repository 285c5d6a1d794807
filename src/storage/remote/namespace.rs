//! Remote key namespace
//!
//! Build outputs are only reusable by the same toolchain on the same target,
//! so remote keys live under `cache/<key>/<GOARCH>/<GOOS>/<GOVERSION>`.

use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Fallback when the toolchain version cannot be determined
const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(cache_key: &str, goarch: &str, goos: &str, goversion: &str) -> Self {
        Self {
            prefix: format!("cache/{}/{}/{}/{}", cache_key, goarch, goos, goversion),
        }
    }

    /// Build the namespace from `GOARCH`, `GOOS` and `GOVERSION`, detecting
    /// whichever of them is unset
    pub async fn detect(cache_key: &str) -> Self {
        let goarch = env_override("GOARCH").unwrap_or_else(|| go_arch(std::env::consts::ARCH).to_string());
        let goos = env_override("GOOS").unwrap_or_else(|| go_os(std::env::consts::OS).to_string());
        let goversion = match env_override("GOVERSION") {
            Some(version) => version,
            None => toolchain_version().await,
        };
        Self::new(cache_key, &goarch, &goos, &goversion)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key for an action
    pub fn object_key(&self, action_id: &str) -> String {
        format!("{}/{}", self.prefix, action_id)
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Map a Rust target architecture to its GOARCH name
fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        "mips64" if cfg!(target_endian = "little") => "mips64le",
        "mips" if cfg!(target_endian = "little") => "mipsle",
        other => other,
    }
}

/// Map a Rust target OS to its GOOS name
fn go_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

/// Ask the installed Go toolchain for its version
async fn toolchain_version() -> String {
    let output = Command::new("go")
        .args(["env", "GOVERSION"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if version.is_empty() {
                UNKNOWN_VERSION.to_string()
            } else {
                version
            }
        }
        Ok(output) => {
            debug!("go env GOVERSION exited with {}", output.status);
            UNKNOWN_VERSION.to_string()
        }
        Err(e) => {
            debug!("go toolchain not available: {}", e);
            UNKNOWN_VERSION.to_string()
        }
    }
}
