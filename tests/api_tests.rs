// tests/api_tests.rs

use gep::{config::Config, documents::BANK_FILE, routes, state::AppState};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Helper function to spawn the document server on a random port.
/// Returns the base URL and the data directory, which must outlive the test.
async fn spawn_app() -> (String, TempDir) {
    // 1. Isolated data directory with a small question bank
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let bank = json!({
        "questions": [
            {"QCODE": "AB20AA-01", "ETITLE": "손해사정사", "EROUND": 20.0, "LAYER1": "관계법령",
             "QNUMBER": 1, "QUESTION": "보험업법상 보험회사의 정의는?", "ANSWER": "3"},
            {"QCODE": "AB20AA-02", "ETITLE": "손해사정사", "EROUND": 20.0, "LAYER1": "손보1부",
             "QNUMBER": 2, "QUESTION": "화재보험의 보상 범위는?", "ANSWER": "1"},
            {"QCODE": "AB21AA-01", "ETITLE": "손해사정사", "EROUND": 21.0, "LAYER1": "관계법령",
             "QNUMBER": 1, "QUESTION": "상법상 고지의무 위반의 효과는?", "ANSWER": "2"}
        ]
    });
    std::fs::write(
        data_dir.path().join(BANK_FILE),
        serde_json::to_vec(&bank).unwrap(),
    )
    .expect("Failed to write bank");

    // 2. Router over that directory
    let state = AppState::new(Config::for_data_dir(data_dir.path()));
    let app = routes::create_router(state);

    // 3. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 4. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, data_dir)
}

fn derived(code: &str, question: &str) -> Value {
    json!({
        "QCODE": code, "ETITLE": "손해사정사", "EROUND": 20, "LAYER1": "관계법령",
        "QUESTION": question, "ANSWER": "O", "QTYPE": "B", "SOURCE_QCODE": "AB20AA-01",
        "PARENT_INFO": "20회 관계법령 1번"
    })
}

#[tokio::test]
async fn unknown_path_is_404() {
    let (address, _dir) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn question_bank_is_served_and_filterable() {
    let (address, _dir) = spawn_app().await;
    let client = reqwest::Client::new();

    let all: Value = client
        .get(format!("{}/api/questions", address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["questions"].as_array().unwrap().len(), 3);

    let filtered: Value = client
        .get(format!("{}/api/questions", address))
        .query(&[("layer", "관계법령"), ("round", "21")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let questions = filtered["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0]["QCODE"], "AB21AA-01");

    let keyword: Value = client
        .get(format!("{}/api/questions?q=화재", address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(keyword["questions"][0]["QCODE"], "AB20AA-02");
}

#[tokio::test]
async fn derived_document_defaults_when_missing() {
    let (address, _dir) = spawn_app().await;

    let body: Value = reqwest::get(format!("{}/api/derived-questions", address))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["metadata"]["version"], "QManager Questions V1.0");
    assert_eq!(body["metadata"]["total_questions"], 0);
    assert_eq!(body["questions"], json!([]));
}

#[tokio::test]
async fn save_then_load_derived_document() {
    let (address, _dir) = spawn_app().await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/derived-questions", address);

    let response = client
        .post(&url)
        .json(&json!({
            "metadata": {"description": "test run", "total_questions": 99},
            "questions": [
                derived("AB20AA-01-B1", "보험회사는 주식회사만 가능하다<script>x()</script>"),
                derived("AB20AA-01-B2", "상호회사도 보험회사가 될 수 있다"),
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let reply: Value = response.json().await.unwrap();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["total_questions"], 2);

    let stored: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(stored["metadata"]["total_questions"], 2);
    assert_eq!(stored["metadata"]["description"], "test run");
    assert_eq!(
        stored["questions"][0]["QUESTION"],
        "보험회사는 주식회사만 가능하다"
    );
}

#[tokio::test]
async fn duplicate_codes_are_a_conflict() {
    let (address, _dir) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/derived-questions", address))
        .json(&json!({
            "questions": [derived("AB20AA-01-B1", "a"), derived("AB20AA-01-B1", "b")]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn original_questions_are_rejected() {
    let (address, _dir) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/derived-questions", address))
        .json(&json!({
            "questions": [{"QCODE": "AB20AA-09", "QUESTION": "q", "ANSWER": "1"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn archive_copies_the_saved_document() {
    let (address, dir) = spawn_app().await;
    let client = reqwest::Client::new();
    let archive_url = format!("{}/api/derived-questions/archive", address);

    let empty = client.post(&archive_url).send().await.unwrap();
    assert_eq!(empty.status().as_u16(), 400);

    client
        .post(format!("{}/api/derived-questions", address))
        .json(&json!({"questions": [derived("AB20AA-01-B1", "a")]}))
        .send()
        .await
        .unwrap();

    let response = client.post(&archive_url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    let filename = body["filename"].as_str().unwrap();
    assert!(filename.starts_with("derived_questions_"));
    assert_eq!(body["total_questions"], 1);
    assert!(dir.path().join("archive").join(filename).exists());
}
