//! Code-generation oracle seam for Tier 3 repairs

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Failure context sent to the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    pub component: String,
    pub error: String,
    /// Condensed prior failed actions, oldest first
    pub history: Vec<String>,
}

impl OracleRequest {
    /// Render as a single prompt for text-completion backends
    pub fn to_prompt(&self) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "The component `{}` is failing and earlier automated repairs did not fix it.",
            self.component
        );
        let _ = writeln!(prompt, "\nCurrent error:\n{}", self.error.trim());
        if !self.history.is_empty() {
            prompt.push_str("\nPrevious failed repair actions:\n");
            for entry in &self.history {
                let _ = writeln!(prompt, "- {entry}");
            }
        }
        prompt.push_str(
            "\nReply with ONE fenced code block tagged `bash` or `python` containing a \
             non-interactive script that repairs the component. The script runs in an empty \
             temporary directory with a minimal environment. Exit non-zero if the repair fails.\n",
        );
        prompt
    }
}

/// Produces candidate repair code as free text
#[async_trait]
pub trait CodeGenerationOracle: Send + Sync {
    async fn propose_repair(&self, request: &OracleRequest) -> anyhow::Result<String>;
}

/// Oracle for deployments without code generation; every request fails
pub struct NullOracle;

#[async_trait]
impl CodeGenerationOracle for NullOracle {
    async fn propose_repair(&self, _request: &OracleRequest) -> anyhow::Result<String> {
        anyhow::bail!("no code-generation oracle configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_context() {
        let request = OracleRequest {
            component: "ollama_service".into(),
            error: "connection refused".into(),
            history: vec!["tier1_restart: systemctl restart ollama -> exit 1".into()],
        };
        let prompt = request.to_prompt();
        assert!(prompt.contains("`ollama_service`"));
        assert!(prompt.contains("connection refused"));
        assert!(prompt.contains("- tier1_restart: systemctl restart ollama"));
        assert!(prompt.contains("fenced code block"));
    }

    #[tokio::test]
    async fn test_null_oracle_errors() {
        let request = OracleRequest {
            component: "db".into(),
            error: "down".into(),
            history: vec![],
        };
        assert!(NullOracle.propose_repair(&request).await.is_err());
    }
}
