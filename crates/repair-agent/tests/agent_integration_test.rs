//! End-to-end tests for the repair agent against a loopback HTTP server,
//! real restart commands and a scratch git repository.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coordination::oracle::{CodeGenerationOracle, OracleRequest};
use coordination::state::{MemoryStore, RepairOutcome, RepairTier, TaskStatus};
use repair_agent::config::OracleConfig;
use repair_agent::oracle::HttpOracle;
use repair_agent::{AgentConfig, RepairAgent, TaskSpec};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal HTTP/1.1 server answering every request with `status` and `body`
struct FakeServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

async fn serve(status: u16, body: String) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let seen = Arc::clone(&seen);
            let body = body.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    FakeServer {
        base_url: format!("http://{addr}"),
        requests,
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn chat_reply(content: &str) -> String {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
}

fn git_init(dir: &Path) {
    let status = std::process::Command::new("git")
        .args(["init", "-q"])
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::write(dir.join("app.conf"), "port = 8080\n").unwrap();
}

#[tokio::test]
async fn test_http_oracle_posts_chat_request() {
    let server = serve(200, chat_reply("```bash\nsystemctl restart app\n```")).await;
    let oracle = HttpOracle::from_config(&OracleConfig {
        url: Some(format!("{}/v1", server.base_url)),
        model: "coder-14b".into(),
        api_key: Some("secret-token".into()),
        ..OracleConfig::default()
    })
    .unwrap();

    let reply = oracle
        .propose_repair(&OracleRequest {
            component: "app".into(),
            error: "crash loop".into(),
            history: vec!["tier1_restart: restart -> exit 1".into()],
        })
        .await
        .unwrap();
    assert!(reply.contains("systemctl restart app"));

    let requests = server.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.starts_with("POST /v1/chat/completions"));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer secret-token"));
    assert!(request.contains("\"model\":\"coder-14b\""));
    assert!(request.contains("crash loop"));
}

#[tokio::test]
async fn test_http_oracle_surfaces_api_errors() {
    let server = serve(500, "{\"error\":\"model not loaded\"}".into()).await;
    let oracle = HttpOracle::from_config(&OracleConfig {
        url: Some(server.base_url.clone()),
        ..OracleConfig::default()
    })
    .unwrap();
    let err = oracle
        .propose_repair(&OracleRequest {
            component: "app".into(),
            error: "boom".into(),
            history: Vec::new(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("model not loaded"));
}

#[tokio::test]
async fn test_restart_with_healthy_http_probe_repairs() {
    let health = serve(200, "{\"status\":\"ok\"}".into()).await;
    let config = AgentConfig::from_toml_str(&format!(
        r#"
[components.api]
restart = "true"

[[components.api.probes]]
kind = "http"
url = "{}/health"
"#,
        health.base_url
    ))
    .unwrap();
    let agent = RepairAgent::with_store(config, MemoryStore::new().shared()).unwrap();

    assert!(agent.repair("api", "connection refused", json!({})).await);
    let attempt = &agent.engine().ledger().history("api").unwrap()[0];
    assert_eq!(attempt.repair_tier, RepairTier::Restart);
    assert_eq!(attempt.outcome, RepairOutcome::Success);
    assert_eq!(attempt.repair_action, "restart: true");
}

#[tokio::test]
async fn test_failing_restart_command_is_not_repaired() {
    let config = AgentConfig::from_toml_str("[components.api]\nrestart = \"false\"\n").unwrap();
    let agent = RepairAgent::with_store(config, MemoryStore::new().shared()).unwrap();

    assert!(!agent.repair("api", "connection refused", json!({})).await);
    let attempt = &agent.engine().ledger().history("api").unwrap()[0];
    assert_eq!(attempt.outcome, RepairOutcome::Failure);
    assert!(attempt.execution_details.contains("restart_failure"));
}

#[tokio::test]
async fn test_generated_repair_with_git_snapshot() {
    let repo = tempfile::tempdir().unwrap();
    git_init(repo.path());
    let marker = repo.path().join("repaired.flag");
    let oracle = serve(
        200,
        chat_reply(&format!(
            "The config is stale. Run:\n```sh\necho ok > '{}'\n```",
            marker.display()
        )),
    )
    .await;

    let config = AgentConfig::from_toml_str(&format!(
        r#"
[escalation]
max_tier1_attempts = 0
max_tier2_attempts = 0

[oracle]
url = "{oracle}/v1"

[snapshots]
git_dir = "{repo}"

[components.renderer]
goal = "Render frames"

[[components.renderer.probes]]
kind = "file"
path = "{marker}"
"#,
        oracle = oracle.base_url,
        repo = repo.path().display(),
        marker = marker.display(),
    ))
    .unwrap();
    let agent = RepairAgent::with_store(config, MemoryStore::new().shared()).unwrap();

    assert!(agent.repair("renderer", "KeyError: 'frame'", json!({})).await);
    assert!(marker.exists());

    let attempt = &agent.engine().ledger().history("renderer").unwrap()[0];
    assert_eq!(attempt.repair_tier, RepairTier::GeneratedCode);
    assert!(attempt.snapshot_id.is_some());
    assert!(agent.engine().ledger().rollbacks("renderer").unwrap().is_empty());

    let report = agent.report("renderer", None).unwrap();
    assert!(report.contains("Render frames"));
}

#[tokio::test]
async fn test_run_tasks_drains_queue() {
    let config = AgentConfig::from_toml_str(
        "[pool]\nworkers = 2\n\n[components.api]\nrestart = \"true\"\n",
    )
    .unwrap();
    let agent = RepairAgent::with_store(config, MemoryStore::new().shared()).unwrap();

    let finished = agent
        .run_tasks(
            vec![
                TaskSpec {
                    task_type: "echo".into(),
                    payload: json!({"msg": "hi"}),
                    priority: 0,
                    max_retries: None,
                },
                TaskSpec {
                    task_type: "component_repair".into(),
                    payload: json!({"component": "api", "error_message": "down"}),
                    priority: 0,
                    max_retries: Some(0),
                },
                TaskSpec {
                    task_type: "component_repair".into(),
                    payload: json!({"component": "missing", "error_message": "down"}),
                    priority: 0,
                    max_retries: Some(0),
                },
            ],
            Duration::from_secs(30),
        )
        .await
        .unwrap();

    let statuses: Vec<_> = finished.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Completed, TaskStatus::Completed, TaskStatus::Failed]
    );
    assert_eq!(finished[1].result.as_ref().unwrap()["repaired"], true);
}
