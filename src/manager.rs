// src/manager.rs

//! The Command API used by the quiz, generator, manager and dashboard pages.
//!
//! A `DataManager` is constructed explicitly and passed to whoever needs it;
//! several can live side by side, each with its own storage.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use validator::Validate;

use crate::{
    aggregation::{self, CategoryStats, ProblemGroups},
    config::StoreConfig,
    error::{InitError, PersistenceError, StoreError},
    models::{
        event::{Event, EventFilter, EventKind, NewEvent, QuizOutcome, QuizResultRequest},
        problem::{DeriveQuestionRequest, Problem, QuestionFilter},
        statistics::Statistics,
        user::User,
    },
    notify::{ChangeAction, ChangeNotice},
    persistence::{
        BACKUP_VERSION, Backup, FileCache, HttpRemote, LocalCache, LocalOnly, MemoryCache,
        PersistenceAdapter, RemoteSync,
    },
    store::{PartitionName, RecordFilter, Snapshot, Store, Upserted},
    sync::SyncStatus,
    utils::{html::clean_question_text, qcode::next_derived_code},
};

/// Attempts at finding a free variant code when concurrent derivations race.
const DERIVE_ATTEMPTS: usize = 8;

/// Result of `add_event`: the stored event and, for quiz results, the
/// statistics it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventReceipt {
    pub event: Event,
    pub statistics: Option<Statistics>,
}

/// Point-in-time overview for diagnostics pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub namespace: String,
    pub partitions: BTreeMap<PartitionName, usize>,
    pub queue_depth: usize,
    pub draining: bool,
    pub last_local_save: Option<DateTime<Utc>>,
    pub local_degraded: bool,
    pub initialized: bool,
}

pub struct DataManager {
    store: Store,
    persistence: Arc<PersistenceAdapter>,
    initialized: AtomicBool,
}

impl DataManager {
    /// Builds the local and remote ports from `config` and opens the store.
    pub async fn open(config: StoreConfig) -> Result<Self, InitError> {
        let local: Arc<dyn LocalCache> = match &config.cache_dir {
            Some(dir) => Arc::new(FileCache::open(dir)?),
            None => Arc::new(MemoryCache::new()),
        };
        let remote: Arc<dyn RemoteSync> = match &config.remote_url {
            Some(base) => Arc::new(HttpRemote::new(base, &config.bank_path, &config.derived_path)?),
            None => Arc::new(LocalOnly),
        };
        Ok(Self::open_with(&config, local, remote).await)
    }

    /// Opens the store over explicit ports.
    ///
    /// * Loads the last local snapshot, or starts four empty partitions and saves them.
    /// * Starts the sync engine.
    /// * Fetches the question bank and the derived-question document once.
    ///   Fetch failures are logged; the store keeps serving its local state.
    pub async fn open_with(
        config: &StoreConfig,
        local: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteSync>,
    ) -> Self {
        let persistence = Arc::new(PersistenceAdapter::new(local, remote, config.namespace.clone()));

        let (snapshot, fresh) = match persistence.load_local() {
            Some(snapshot) => {
                tracing::info!(
                    "Loaded local snapshot {:?} ({} records)",
                    persistence.namespace(),
                    snapshot.len()
                );
                (snapshot, false)
            }
            None => {
                tracing::info!("No local snapshot for {:?}, initializing", persistence.namespace());
                (Snapshot::new(Utc::now()), true)
            }
        };

        let store = Store::new(
            snapshot,
            persistence.clone(),
            config.retry_delay,
            config.notify_capacity,
        );
        if fresh {
            store.persist_local();
        }

        let manager = Self {
            store,
            persistence,
            initialized: AtomicBool::new(false),
        };
        manager.load_remote().await;
        manager.initialized.store(true, Ordering::Release);
        manager
    }

    async fn load_remote(&self) {
        match self.persistence.fetch_remote_problems().await {
            Ok(problems) => {
                let fetched = problems.len();
                let imported = self.store.import_problems(problems);
                tracing::info!("Question bank loaded: {} fetched, {} imported", fetched, imported);
            }
            Err(e) => tracing::warn!("Question bank unavailable, using local copy: {}", e),
        }

        match self.persistence.fetch_remote_derived().await {
            Ok(document) => {
                let derived: Vec<Problem> = document
                    .questions
                    .into_iter()
                    .filter(|p| p.is_derived() && p.check_schema().is_ok())
                    .collect();
                let imported = self.store.import_problems(derived);
                tracing::info!("Derived questions loaded: {} new", imported);
            }
            Err(e) => tracing::warn!("Derived questions unavailable: {}", e),
        }
    }

    /// Direct partition access (`get`/`list`/`add`/`update`/`upsert`/`delete`).
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    // Questions

    pub fn get_question(&self, code: &str) -> Option<Problem> {
        self.store.get::<Problem>(code)
    }

    pub fn get_questions(&self, filter: &QuestionFilter) -> Vec<Problem> {
        self.store.list::<Problem>(&filter.to_record_filter())
    }

    /// Case-insensitive substring search over code and question text,
    /// narrowed by round and topic layer when given.
    pub fn search_questions(&self, term: &str, round: Option<u32>, layer: Option<&str>) -> Vec<Problem> {
        let term = term.trim().to_lowercase();
        let mut filter = RecordFilter::new();
        if let Some(round) = round {
            filter = filter.with("EROUND", round);
        }
        if let Some(layer) = layer {
            filter = filter.with("LAYER1", layer);
        }
        self.store
            .list::<Problem>(&filter)
            .into_iter()
            .filter(|p| {
                term.is_empty()
                    || p.code.to_lowercase().contains(&term)
                    || p.question.to_lowercase().contains(&term)
            })
            .collect()
    }

    /// Question text is sanitized the way the document server stores it.
    pub fn add_question(&self, mut problem: Problem) -> Result<bool, StoreError> {
        problem.question = clean_question_text(&problem.question);
        let code = problem.code.clone();
        self.store.add(&code, problem)
    }

    pub fn update_question(&self, code: &str, patch: &Map<String, Value>) -> Result<bool, StoreError> {
        match patch.get("QUESTION").and_then(Value::as_str) {
            Some(text) => {
                let mut patch = patch.clone();
                patch.insert("QUESTION".to_string(), Value::String(clean_question_text(text)));
                self.store.update::<Problem>(code, &patch)
            }
            None => self.store.update::<Problem>(code, patch),
        }
    }

    pub fn delete_question(&self, code: &str) -> bool {
        self.store.delete::<Problem>(code)
    }

    /// Authors a variant of an existing question under the next free
    /// `<source>-B<n>` code. `Ok(None)` when the source does not exist.
    pub fn derive_question(&self, req: DeriveQuestionRequest) -> Result<Option<Problem>, StoreError> {
        req.validate()?;
        let Some(source) = self.get_question(&req.source_code) else {
            return Ok(None);
        };

        for _ in 0..DERIVE_ATTEMPTS {
            // Any problem may hold a `<source>-B<n>` code, not only variants of `source`.
            let taken = self.store.keys::<Problem>();
            let Some(code) = next_derived_code(&source.code, taken.iter().map(String::as_str)) else {
                return Err(StoreError::MalformedInput(format!(
                    "variant codes of {} are used up",
                    source.code
                )));
            };
            let derived = source.derive(code, clean_question_text(&req.question), req.answer.clone(), Utc::now());
            if self.store.add(&derived.code, derived.clone())? {
                tracing::info!("Derived question {} from {}", derived.code, source.code);
                return Ok(Some(derived));
            }
        }
        Err(StoreError::MalformedInput(format!(
            "no free variant code for {} after {} attempts",
            source.code, DERIVE_ATTEMPTS
        )))
    }

    // Users

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.store.get::<User>(id)
    }

    /// Creates the user or merges `profile` into the existing one.
    pub fn save_user(&self, id: &str, profile: Map<String, Value>) -> Result<Upserted, StoreError> {
        if id.is_empty() {
            return Err(StoreError::MalformedInput("user id is required".to_string()));
        }
        self.store.upsert(id, User::new(id, profile))
    }

    pub fn delete_user(&self, id: &str) -> bool {
        self.store.delete::<User>(id)
    }

    // Events and statistics

    /// Appends an event. A quiz result is folded into its user's statistics
    /// in the same call, after the event is stored.
    pub fn add_event(&self, new: NewEvent) -> Result<EventReceipt, StoreError> {
        new.validate()?;
        let is_quiz = new.kind == EventKind::QUIZ_RESULT;
        let outcome = if is_quiz {
            let outcome = QuizOutcome::from_payload(&new.payload)
                .map_err(|e| StoreError::MalformedInput(format!("invalid quiz result: {}", e)))?;
            Some(outcome)
        } else {
            None
        };

        let event = self.store.append_event(new)?;
        let statistics = outcome.map(|outcome| {
            self.store.update_statistics(&event.user_id, |current| {
                aggregation::record_quiz_result(current, &outcome, event.timestamp)
            })
        });
        Ok(EventReceipt { event, statistics })
    }

    /// Events matching `filter`, newest first.
    ///
    /// Matches on the event's own `user_id` and `kind`, never on payload fields.
    pub fn get_events(&self, filter: &EventFilter) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .store
            .list::<Event>(&RecordFilter::new())
            .into_iter()
            .filter(|e| filter.user_id.as_deref().is_none_or(|user| e.user_id == user))
            .filter(|e| filter.kind.as_deref().is_none_or(|kind| e.kind.as_str() == kind))
            .filter(|e| filter.in_range(e.timestamp))
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }

    /// Records one answered question and returns the user's updated statistics.
    pub fn save_quiz_result(&self, req: QuizResultRequest) -> Result<Statistics, StoreError> {
        req.validate()?;
        let receipt = self.add_event(req.into_event())?;
        Ok(receipt
            .statistics
            .unwrap_or_else(|| self.get_statistics(&receipt.event.user_id)))
    }

    /// Statistics for `user_id`, zeroed when the user has not answered anything.
    pub fn get_statistics(&self, user_id: &str) -> Statistics {
        self.store
            .get::<Statistics>(user_id)
            .unwrap_or_else(|| Statistics::empty(user_id))
    }

    pub fn category_breakdown(&self, user_id: &str) -> BTreeMap<String, CategoryStats> {
        let snapshot = self.store.snapshot();
        let index: HashMap<&str, &Problem> = snapshot
            .problems
            .values()
            .map(|p| (p.code.as_str(), p))
            .collect();
        aggregation::category_breakdown(
            snapshot.events.values().filter(|e| e.user_id == user_id),
            &index,
        )
    }

    pub fn problem_groups(&self) -> ProblemGroups {
        let problems = self.store.list::<Problem>(&RecordFilter::new());
        aggregation::problem_groups(problems.iter())
    }

    // Maintenance

    pub fn summary(&self) -> StoreSummary {
        let status = self.store.sync().status();
        let partitions = BTreeMap::from([
            (PartitionName::Problem, self.store.count::<Problem>()),
            (PartitionName::User, self.store.count::<User>()),
            (PartitionName::Event, self.store.count::<Event>()),
            (PartitionName::Statistics, self.store.count::<Statistics>()),
        ]);
        StoreSummary {
            namespace: self.persistence.namespace().to_string(),
            partitions,
            queue_depth: status.queue_depth,
            draining: status.draining,
            last_local_save: status.last_local_save,
            local_degraded: status.local_degraded,
            initialized: self.is_initialized(),
        }
    }

    /// Saves a copy of the whole store under `<namespace>_backup` and returns it.
    pub fn backup(&self) -> Result<Backup, PersistenceError> {
        let backup = Backup {
            data: self.store.snapshot(),
            timestamp: Utc::now(),
            version: BACKUP_VERSION.to_string(),
        };
        self.persistence.save_backup(&backup)?;
        tracing::info!("Backup written ({} records)", backup.data.len());
        Ok(backup)
    }

    /// Replaces every partition with the backup's contents.
    ///
    /// Records are checked the way a stored snapshot is: malformed or
    /// misfiled ones are dropped and accuracy is recomputed. Returns the
    /// number of records dropped.
    pub fn restore(&self, backup: Backup) -> usize {
        let loaded = backup.data.validated();
        if loaded.rejected > 0 {
            tracing::warn!("Backup contains {} malformed records; dropping them", loaded.rejected);
        }
        tracing::info!(
            "Restoring backup from {} ({} records)",
            backup.timestamp,
            loaded.snapshot.len()
        );
        self.store.replace_all(loaded.snapshot, ChangeAction::Restore);
        loaded.rejected
    }

    /// Restores the backup saved by `backup`. `Ok(false)` when there is none.
    pub fn restore_saved(&self) -> Result<bool, PersistenceError> {
        match self.persistence.load_backup()? {
            Some(backup) => {
                self.restore(backup);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Empties every partition and drops pending sync entries.
    pub fn clear(&self) {
        tracing::warn!("Clearing all partitions of {:?}", self.persistence.namespace());
        self.store.replace_all(Snapshot::new(Utc::now()), ChangeAction::Clear);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.store.notifier().subscribe()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.store.sync().status()
    }

    pub fn watch_sync(&self) -> watch::Receiver<SyncStatus> {
        self.store.sync().subscribe()
    }

    pub fn queue_depth(&self) -> usize {
        self.store.sync().queue_depth()
    }

    pub fn is_draining(&self) -> bool {
        self.store.sync().is_draining()
    }

    /// Waits until every queued mutation has reached the remote.
    pub async fn settle(&self) {
        self.store.sync().settle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn manager() -> DataManager {
        DataManager::open(StoreConfig::default()).await.unwrap()
    }

    fn problem(code: &str, layer: &str) -> Problem {
        serde_json::from_value(json!({
            "QCODE": code, "ETITLE": "손해사정사", "EROUND": 20, "LAYER1": layer,
            "QNUMBER": 3, "QUESTION": "보험계약의 성립 요건은?", "ANSWER": "2"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_offline_initializes_empty() {
        let m = manager().await;
        assert!(m.is_initialized());
        let summary = m.summary();
        assert!(summary.partitions.values().all(|n| *n == 0));
        assert!(summary.last_local_save.is_some());
    }

    #[tokio::test]
    async fn test_derive_question_numbers_variants() {
        let m = manager().await;
        m.add_question(problem("AB20AA-03", "관계법령")).unwrap();

        let req = |q: &str| DeriveQuestionRequest {
            source_code: "AB20AA-03".into(),
            question: q.into(),
            answer: "O".into(),
        };
        let first = m.derive_question(req("변형 1")).unwrap().unwrap();
        let second = m.derive_question(req("변형 2")).unwrap().unwrap();

        assert_eq!(first.code, "AB20AA-03-B1");
        assert_eq!(second.code, "AB20AA-03-B2");
        assert_eq!(second.source_code.as_deref(), Some("AB20AA-03"));
        assert_eq!(second.parent_info.as_deref(), Some("20회 관계법령 3번"));
        assert!(second.is_derived());
    }

    #[tokio::test]
    async fn test_derive_from_missing_source_is_none() {
        let m = manager().await;
        let req = DeriveQuestionRequest {
            source_code: "NOPE".into(),
            question: "q".into(),
            answer: "X".into(),
        };
        assert!(m.derive_question(req).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_filtered() {
        let m = manager().await;
        m.add_question(problem("ab20aa-01", "관계법령")).unwrap();
        m.add_question(problem("AB20AA-02", "손보1부")).unwrap();

        assert_eq!(m.search_questions("AB20", None, None).len(), 2);
        assert_eq!(m.search_questions("ab20", Some(20), Some("손보1부")).len(), 1);
        assert!(m.search_questions("ab20", Some(21), None).is_empty());
    }

    #[tokio::test]
    async fn test_add_event_without_kind_is_rejected() {
        let m = manager().await;
        let result = m.add_event(NewEvent::new("", "u1", Map::new()));
        assert!(matches!(result, Err(StoreError::MalformedInput(_))));
        assert_eq!(m.store().count::<Event>(), 0);
    }

    #[tokio::test]
    async fn test_quiz_result_without_correctness_is_rejected_before_insert() {
        let m = manager().await;
        let result = m.add_event(NewEvent::new("quiz_result", "u1", Map::new()));
        assert!(result.is_err());
        assert_eq!(m.store().count::<Event>(), 0);
        assert_eq!(m.get_statistics("u1").total_questions, 0);
    }

    #[tokio::test]
    async fn test_get_events_newest_first_by_user() {
        let m = manager().await;
        for user in ["u1", "u2", "u1"] {
            m.add_event(NewEvent::new("page_view", user, Map::new())).unwrap();
        }
        let events = m.get_events(&EventFilter::for_user("u1"));
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp > events[1].timestamp);
    }

    #[tokio::test]
    async fn test_backup_and_restore_saved() {
        let m = manager().await;
        m.add_question(problem("Q1", "관계법령")).unwrap();
        m.backup().unwrap();

        m.clear();
        assert!(m.get_question("Q1").is_none());

        assert!(m.restore_saved().unwrap());
        assert!(m.get_question("Q1").is_some());
    }
}
