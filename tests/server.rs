use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use libris::config::Settings;
use libris::embedding::{Embedder, HashEmbedder};
use libris::server::router;
use libris::store::MemoryIndex;
use libris::App;
use tempfile::TempDir;

async fn start_server(tmp: &TempDir) -> String {
    let texts = tmp.path().join("texts");
    std::fs::create_dir_all(&texts).unwrap();
    std::fs::write(
        texts.join("negotiation.md"),
        "Never split the difference. Label emotions and ask calibrated questions.",
    )
    .unwrap();

    let env: HashMap<&str, String> = HashMap::from([
        ("LLM_MODE", "offline".to_string()),
        ("EMBEDDING_PROVIDER", "hash".to_string()),
        ("EMBEDDINGS_PATH", tmp.path().join("embeddings").display().to_string()),
    ]);
    let settings = Settings::from_lookup(|key| env.get(key).cloned()).unwrap();
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
    let app = App::with_services(settings, embedder, Arc::new(MemoryIndex::new()));
    app.ingestor().ingest(&[texts]).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = app.engine().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(engine)).await.unwrap();
    });

    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{}/health", base)).send().await {
            if resp.status().is_success() {
                return base;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server did not become healthy at {}", base);
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn ask_via_query_and_json_body() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/ask", base))
        .query(&[("q", "How do I negotiate?")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["generator"]["mode"], "offline");
    assert_eq!(body["sources"][0]["source"], "texts/negotiation.md");
    assert_eq!(body["config"]["top_k"], 6);

    let resp = client
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({"question": "How do I negotiate?", "top_k": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["config"]["top_k"], 1);
    assert_eq!(body["contexts"].as_array().unwrap().len(), 1);
    assert!(body["answer"]
        .as_str()
        .unwrap()
        .contains("Label emotions"));
}

#[tokio::test]
async fn bad_requests_use_error_contract() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({"question": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "question must not be empty");

    let resp = client.get(format!("{}/ask", base)).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/ask", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
