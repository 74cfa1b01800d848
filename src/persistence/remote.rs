// src/persistence/remote.rs

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::{
    error::SyncError,
    models::{
        document::{QuestionBank, QuestionDocument, SaveResponse},
        problem::{Problem, parse_problems},
    },
    store::PartitionName,
    sync::MutationAction,
};

/// What one queue entry pushes to the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    /// The full derived-question document. Built for Problem mutations.
    DerivedQuestions(QuestionDocument),
    /// The current state of a single record (`None` once deleted).
    Record {
        partition: PartitionName,
        action: MutationAction,
        key: String,
        record: Option<Value>,
    },
}

/// Asynchronous access to the remote document store.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// One-shot load of the canonical question bank.
    async fn fetch_question_bank(&self) -> Result<Vec<Problem>, SyncError>;

    async fn fetch_derived_questions(&self) -> Result<QuestionDocument, SyncError>;

    /// Best-effort push. A failure leaves local state untouched.
    async fn push(&self, payload: &SyncPayload) -> Result<(), SyncError>;
}

/// Remote used when no endpoint is configured: nothing to fetch, and every
/// push is acknowledged so the queue drains.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

#[async_trait]
impl RemoteSync for LocalOnly {
    async fn fetch_question_bank(&self) -> Result<Vec<Problem>, SyncError> {
        Err(SyncError::Unavailable("no remote endpoint configured".to_string()))
    }

    async fn fetch_derived_questions(&self) -> Result<QuestionDocument, SyncError> {
        Err(SyncError::Unavailable("no remote endpoint configured".to_string()))
    }

    async fn push(&self, _payload: &SyncPayload) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Remote backed by the question-bank document server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    bank_url: Url,
    derived_url: Url,
}

impl HttpRemote {
    pub fn new(base: &Url, bank_path: &str, derived_path: &str) -> Result<Self, SyncError> {
        Ok(Self {
            client: reqwest::Client::new(),
            bank_url: base.join(bank_path)?,
            derived_url: base.join(derived_path)?,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<T, SyncError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteSync for HttpRemote {
    async fn fetch_question_bank(&self) -> Result<Vec<Problem>, SyncError> {
        let bank: QuestionBank = self.get_json(&self.bank_url).await?;
        let (problems, rejected) = parse_problems(bank.questions);
        if rejected > 0 {
            tracing::warn!("Question bank contained {} malformed records", rejected);
        }
        Ok(problems)
    }

    async fn fetch_derived_questions(&self) -> Result<QuestionDocument, SyncError> {
        self.get_json(&self.derived_url).await
    }

    async fn push(&self, payload: &SyncPayload) -> Result<(), SyncError> {
        let document = match payload {
            SyncPayload::DerivedQuestions(document) => document,
            SyncPayload::Record { partition, key, .. } => {
                // The document server only stores derived questions
                tracing::trace!("No remote endpoint for {} {}; acknowledged", partition, key);
                return Ok(());
            }
        };

        let response = self
            .client
            .post(self.derived_url.clone())
            .json(document)
            .send()
            .await?;
        let status = response.status();
        let reply: Option<SaveResponse> = response.json().await.ok();

        match reply {
            Some(reply) if reply.success => Ok(()),
            Some(reply) => Err(SyncError::Rejected(
                reply.error.unwrap_or_else(|| format!("status {}", status)),
            )),
            None if status.is_success() => Ok(()),
            None => Err(SyncError::Status(status.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_joined_onto_the_base() {
        let base = Url::parse("http://127.0.0.1:5001").unwrap();
        let remote = HttpRemote::new(&base, "/api/questions", "/api/derived-questions").unwrap();
        assert_eq!(remote.bank_url.as_str(), "http://127.0.0.1:5001/api/questions");
        assert_eq!(
            remote.derived_url.as_str(),
            "http://127.0.0.1:5001/api/derived-questions"
        );
    }

    #[tokio::test]
    async fn local_only_acknowledges_pushes() {
        let payload = SyncPayload::Record {
            partition: PartitionName::User,
            action: MutationAction::Add,
            key: "u1".to_string(),
            record: None,
        };
        assert!(LocalOnly.push(&payload).await.is_ok());
        assert!(LocalOnly.fetch_question_bank().await.is_err());
    }
}
