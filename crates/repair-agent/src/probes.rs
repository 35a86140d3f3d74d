//! Probe construction from config, plus the HTTP probe

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use coordination::escalation::{
    CommandSpec, DependencyProbe, EnvProbe, FileProbe, ProbeResult, StorageProbe, TcpProbe,
};

use crate::config::{split_command, ProbeSpec};

/// Healthy when `GET url` answers 2xx within the timeout
pub struct HttpProbe {
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DependencyProbe for HttpProbe {
    fn name(&self) -> String {
        format!("http:{}", self.url)
    }

    async fn check(&self) -> ProbeResult {
        match self.http.get(&self.url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                ProbeResult::healthy(self.name(), format!("{}", resp.status()))
            }
            Ok(resp) => ProbeResult::unhealthy(self.name(), format!("HTTP {}", resp.status())),
            Err(e) => ProbeResult::unhealthy(self.name(), e.to_string()),
        }
    }
}

/// Instantiate the probe described by `spec`
pub fn build_probe(spec: &ProbeSpec, remediation_timeout: Duration) -> Result<Arc<dyn DependencyProbe>> {
    let probe: Arc<dyn DependencyProbe> = match spec {
        ProbeSpec::Http { url, timeout_secs } => {
            Arc::new(HttpProbe::new(url.clone(), Duration::from_secs(*timeout_secs)))
        }
        ProbeSpec::Tcp {
            address,
            timeout_secs,
            remediate,
        } => {
            let mut probe = TcpProbe::new(address.clone(), Duration::from_secs(*timeout_secs));
            if let Some(cmd) = remediate {
                probe = probe.with_remediation(CommandSpec::new(
                    split_command(cmd)?,
                    remediation_timeout,
                ));
            }
            Arc::new(probe)
        }
        ProbeSpec::Env { vars } => Arc::new(EnvProbe::new(vars.clone())),
        ProbeSpec::File { path } => Arc::new(FileProbe::new(path.clone())),
        ProbeSpec::Storage { dir } => Arc::new(StorageProbe::new(dir.clone())),
    };
    Ok(probe)
}
