// tests/sync_tests.rs

use std::time::Duration;

use gep::{
    DataManager,
    config::{Config, StoreConfig},
    documents::BANK_FILE,
    models::problem::DeriveQuestionRequest,
    routes,
    state::AppState,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;

async fn spawn_server() -> (Url, TempDir) {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let bank = json!({
        "questions": [
            {"QCODE": "AB20AA-01", "ETITLE": "손해사정사", "EROUND": 20.0, "LAYER1": "관계법령",
             "QNUMBER": 1, "QUESTION": "보험업법상 보험회사의 정의는?", "ANSWER": "3"},
            {"QCODE": "AB20AA-02", "ETITLE": "손해사정사", "EROUND": 20.0, "LAYER1": "손보1부",
             "QNUMBER": 2, "QUESTION": "화재보험의 보상 범위는?", "ANSWER": "1"},
            {"QCODE": "bad code", "QUESTION": "", "ANSWER": "1"}
        ]
    });
    std::fs::write(data_dir.path().join(BANK_FILE), serde_json::to_vec(&bank).unwrap())
        .expect("Failed to write bank");

    let app = routes::create_router(AppState::new(Config::for_data_dir(data_dir.path())));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let base = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
    (base, data_dir)
}

fn store_config(base: &Url) -> StoreConfig {
    StoreConfig {
        namespace: format!("test_{}", uuid::Uuid::new_v4().simple()),
        ..StoreConfig::default()
    }
    .with_remote(base.clone())
    .with_retry_delay(Duration::from_millis(20))
}

async fn settle(manager: &DataManager) {
    tokio::time::timeout(Duration::from_secs(10), manager.settle())
        .await
        .expect("sync engine did not settle");
}

#[tokio::test]
async fn open_imports_the_valid_part_of_the_bank() {
    let (base, _dir) = spawn_server().await;
    let manager = DataManager::open(store_config(&base)).await.unwrap();

    assert!(manager.is_initialized());
    assert!(manager.get_question("AB20AA-01").is_some());
    assert!(manager.get_question("AB20AA-02").is_some());
    assert_eq!(manager.summary().partitions.values().sum::<usize>(), 2);
}

#[tokio::test]
async fn derived_questions_reach_the_server_and_come_back() {
    let (base, _dir) = spawn_server().await;
    let manager = DataManager::open(store_config(&base)).await.unwrap();

    let derived = manager
        .derive_question(DeriveQuestionRequest {
            source_code: "AB20AA-01".to_string(),
            question: "보험회사는 주식회사에 한한다".to_string(),
            answer: "X".to_string(),
        })
        .unwrap()
        .expect("source exists");
    assert_eq!(derived.code, "AB20AA-01-B1");
    settle(&manager).await;

    let document: Value = reqwest::get(base.join("/api/derived-questions").unwrap())
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(document["metadata"]["total_questions"], 1);
    assert_eq!(document["questions"][0]["QCODE"], "AB20AA-01-B1");
    assert_eq!(document["questions"][0]["SOURCE_QCODE"], "AB20AA-01");

    // A second client with empty local storage picks the variant up at open.
    let other = DataManager::open(store_config(&base)).await.unwrap();
    let loaded = other.get_question("AB20AA-01-B1").expect("derived question loaded");
    assert_eq!(loaded.parent_info.as_deref(), Some("20회 관계법령 1번"));
}

#[tokio::test]
async fn unreachable_remote_keeps_serving_locally() {
    // Nothing listens on this port.
    let base = Url::parse("http://127.0.0.1:9").unwrap();
    let manager = DataManager::open(store_config(&base)).await.unwrap();

    assert!(manager.is_initialized());
    assert!(manager.get_question("AB20AA-01").is_none());

    let profile = json!({"name": "park"});
    let Value::Object(profile) = profile else { unreachable!() };
    manager.save_user("u1", profile).unwrap();
    assert_eq!(manager.get_user("u1").unwrap().profile["name"], "park");
}

#[tokio::test]
async fn file_cache_survives_a_restart() {
    let cache_dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        cache_dir: Some(cache_dir.path().to_path_buf()),
        ..StoreConfig::default()
    };

    {
        let manager = DataManager::open(config.clone()).await.unwrap();
        manager
            .save_quiz_result(gep::models::event::QuizResultRequest::new("u1", "Q1", true))
            .unwrap();
        settle(&manager).await;
    }

    let reopened = DataManager::open(config).await.unwrap();
    let stats = reopened.get_statistics("u1");
    assert_eq!(stats.total_questions, 1);
    assert_eq!(stats.accuracy, 100.0);
    assert_eq!(reopened.get_events(&Default::default()).len(), 1);
}
