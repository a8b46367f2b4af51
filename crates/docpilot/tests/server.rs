//! HTTP transport tests against a server on a free local port.

mod common;

use std::sync::Arc;

use common::{config_for, copilot_with, HangingClient, KeywordEmbedder, ScriptedClient};
use docpilot::server::run_server;
use docpilot::Copilot;
use serde_json::{json, Value};
use tempfile::TempDir;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start(copilot: Copilot) -> String {
    let port = find_free_port();
    let bind = format!("127.0.0.1:{}", port);
    let copilot = Arc::new(copilot);
    tokio::spawn(async move {
        let _ = run_server(&bind, copilot).await;
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn test_query_history_summary_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), "");
    let base = start(copilot_with(&config, Arc::new(KeywordEmbedder), ScriptedClient::new(90))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({"query": "How do I configure Discord analytics?", "session": "alice"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["query"], "How do I configure Discord analytics?");
    assert_eq!(body["escalated"], false);
    assert_eq!(body["escalation"]["state"], "normal");
    assert_eq!(body["sources"][0]["title"], "Discord Integration Guide");
    assert_eq!(body["sources"][0]["url"], "https://docs.example.com/discord");
    assert!(body["sources"][0].get("chunk_id").is_none());
    assert!(body["confidence"].as_u64().unwrap() >= 70);

    let body: Value = client
        .get(format!("{}/history?session=alice&limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["turns"].as_array().unwrap().len(), 1);
    assert_eq!(body["summary"]["turn_count"], 1);

    let body: Value = client
        .post(format!("{}/search_history", base))
        .json(&json!({"session": "alice", "search_term": "discord"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let body: Value = client
        .get(format!("{}/summary?session=alice", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"], "alice");
    assert_eq!(body["turn_count"], 1);
    assert_eq!(body["escalation_count"], 0);
}

#[tokio::test]
async fn test_default_session_and_status() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), "");
    let base = start(copilot_with(&config, Arc::new(KeywordEmbedder), ScriptedClient::new(90))).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/query", base))
        .json(&json!({"query": "billing card"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"], "web");

    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["chunks"], 4);
    assert_eq!(status["dims"], 3);
    assert_eq!(status["sessions"], 1);
}

#[tokio::test]
async fn test_bad_requests_use_error_contract() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), "");
    let base = start(copilot_with(&config, Arc::new(KeywordEmbedder), ScriptedClient::new(90))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({"query": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({"query": "discord", "session": "bad\u{7}key"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/query", base))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/search_history", base))
        .json(&json!({"search_term": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_model_outage_is_a_degraded_200() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), "");
    let base = start(copilot_with(&config, Arc::new(KeywordEmbedder), Arc::new(HangingClient))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({"query": "discord setup", "session": "bob"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["confidence"], 0);
    assert_eq!(body["escalated"], true);
    assert_eq!(body["unavailable"], true);
    assert_eq!(body["answer"], docpilot::UNAVAILABLE_ANSWER);
}

#[tokio::test]
async fn test_escalate_endpoint_records_request() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path(), "[escalation]\nadmin_channel = \"support-oncall\"");
    let base = start(copilot_with(&config, Arc::new(KeywordEmbedder), ScriptedClient::new(90))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/escalate", base))
        .json(&json!({"session": "frank"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["session"], "frank");
    assert_eq!(body["message"], docpilot::ESCALATION_ACK);
    assert_eq!(body["admin_channel"], "support-oncall");
    assert_eq!(body["escalation"]["reason"], "user requested");
    assert_eq!(body["escalation"]["notify_admin"], true);

    let summary: Value = client
        .get(format!("{}/summary?session=frank", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["escalation_requests"], 1);

    let body: Value = client
        .post(format!("{}/escalate", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"], "web");
}
