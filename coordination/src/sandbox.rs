//! Sandbox: isolated execution of generated repair code
//!
//! Oracle output is untrusted. Before it runs it is screened for destructive
//! commands, then executed by an allow-listed interpreter with:
//!
//! - a cleared environment (fixed `PATH`, `HOME` pointing at the sandbox)
//! - a private temporary working directory, removed afterwards
//! - `ulimit` CPU time and virtual memory caps
//! - its own process group and a hard timeout that kills the tree
//! - truncated stdout/stderr capture

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::process::{run_contained, truncate_output, ProcessError};

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Destructive commands never allowed in generated code
static BLOCKED_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"rm\s+(-[a-zA-Z]*\s+)*(/|/\*|~|\$HOME)(\s|$|;)", "recursive delete of root or home"),
        (r"\bmkfs(\.\w+)?\b", "filesystem format"),
        (r"\bdd\s+[^\n]*of=/dev/", "raw device write"),
        (r":\(\)\s*\{\s*:\|:&\s*\};:", "fork bomb"),
        (r"\b(shutdown|reboot|halt|poweroff)\b", "host power control"),
        (r"(curl|wget)[^\n|]*\|\s*(ba|z)?sh\b", "piping remote content to a shell"),
        (r"chmod\s+(-R\s+)?777\s+/(\s|$)", "opening permissions on root"),
        (r">\s*/dev/sd[a-z]", "raw device write"),
    ]
    .into_iter()
    .map(|(pattern, reason)| (Regex::new(pattern).unwrap(), reason))
    .collect()
});

/// Errors raised before or while running a snippet
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Interpreter `{0}` is not allowed")]
    InterpreterNotAllowed(String),

    #[error("Snippet blocked by policy: {0}")]
    Blocked(String),

    #[error("Failed to prepare sandbox: {0}")]
    Setup(#[from] std::io::Error),

    #[error("{0}")]
    Process(#[from] ProcessError),
}

/// Language of a generated snippet, from its fence tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetLanguage {
    Python,
    Bash,
    Shell,
}

impl SnippetLanguage {
    /// Map a fence tag (`python`, `py`, `bash`, `sh`, `shell`)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Self::Python),
            "bash" => Some(Self::Bash),
            "sh" | "shell" => Some(Self::Shell),
            _ => None,
        }
    }

    pub fn interpreter(self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Bash => "bash",
            Self::Shell => "sh",
        }
    }

    fn script_name(self) -> &'static str {
        match self {
            Self::Python => "repair.py",
            Self::Bash | Self::Shell => "repair.sh",
        }
    }
}

/// A candidate repair extracted from oracle output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSnippet {
    pub language: SnippetLanguage,
    pub code: String,
}

impl CodeSnippet {
    pub fn new(language: SnippetLanguage, code: impl Into<String>) -> Self {
        Self {
            language,
            code: code.into(),
        }
    }

    /// blake3 hex digest of the code, recorded in the ledger
    pub fn digest(&self) -> String {
        blake3::hash(self.code.as_bytes()).to_hex().to_string()
    }
}

/// Captured result of one sandboxed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub digest: String,
}

impl SandboxOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Subprocess sandbox for generated repair code
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Reject snippets containing destructive commands
    pub fn screen(&self, snippet: &CodeSnippet) -> Result<(), SandboxError> {
        if snippet.code.trim().is_empty() {
            return Err(SandboxError::Blocked("empty snippet".into()));
        }
        for (pattern, reason) in BLOCKED_PATTERNS.iter() {
            if pattern.is_match(&snippet.code) {
                return Err(SandboxError::Blocked((*reason).to_string()));
            }
        }
        Ok(())
    }

    fn interpreter_for(&self, language: SnippetLanguage) -> Result<&'static str, SandboxError> {
        let interpreter = language.interpreter();
        if self
            .config
            .allowed_interpreters
            .iter()
            .any(|allowed| allowed == interpreter)
        {
            Ok(interpreter)
        } else {
            Err(SandboxError::InterpreterNotAllowed(interpreter.to_string()))
        }
    }

    /// Screen, then execute the snippet. A non-zero exit is returned as
    /// output, not as an error.
    pub async fn run(&self, snippet: &CodeSnippet) -> Result<SandboxOutput, SandboxError> {
        self.screen(snippet)?;
        let interpreter = self.interpreter_for(snippet.language)?;

        let workdir = tempfile::Builder::new().prefix("repair-sandbox-").tempdir()?;
        let script = workdir.path().join(snippet.language.script_name());
        tokio::fs::write(&script, &snippet.code).await?;

        // $0 and $1 keep the interpreter and script path out of the shell text.
        let wrapper = format!(
            "ulimit -t {}; ulimit -v {}; exec \"$0\" \"$1\"",
            self.config.cpu_limit_secs,
            self.config.memory_limit_mb * 1024,
        );
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(wrapper)
            .arg(interpreter)
            .arg(&script)
            .current_dir(workdir.path())
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", workdir.path())
            .env("TMPDIR", workdir.path());

        let digest = snippet.digest();
        debug!(interpreter, digest = %digest, "Running generated snippet");

        let started = Instant::now();
        let output = run_contained(&mut cmd, Duration::from_secs(self.config.timeout_secs))
            .await
            .inspect_err(|e| warn!(digest = %digest, error = %e, "Sandboxed run failed"))?;

        Ok(SandboxOutput {
            exit_code: output.status.code(),
            stdout: truncate_output(&output.stdout, self.config.max_output_bytes),
            stderr: truncate_output(&output.stderr, self.config.max_output_bytes),
            duration_ms: started.elapsed().as_millis() as u64,
            digest,
        })
    }
}
