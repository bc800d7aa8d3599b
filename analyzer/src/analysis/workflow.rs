use super::counter::{count, normalize_keys};
use super::history::HistoryStore;
use super::state::{BlockReason, StateTracker, check_input};
use crate::remote::prelude::{AnalysisClient, GENERIC_ONLINE_FAILURE};
use crate::shared::prelude::{
    AnalysisKey, AnalysisKind, AnalysisMode, AnalysisRecord, AnalysisResult, PendingAnalysis,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// How a single `run` ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Nothing was started.
    Blocked(BlockReason),
    /// An identical successful analysis was moved to the front of history.
    Promoted(Arc<AnalysisRecord>),
    /// A new record, successful or not, was added to history.
    Completed(Arc<AnalysisRecord>),
}

impl RunOutcome {
    pub fn record(&self) -> Option<&Arc<AnalysisRecord>> {
        match self {
            RunOutcome::Blocked(_) => None,
            RunOutcome::Promoted(record) | RunOutcome::Completed(record) => Some(record),
        }
    }

    pub fn is_success(&self) -> bool {
        self.record().map(|r| r.is_success()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Ready,
    Blocked(BlockReason),
}

/// Clears the loading flag when dropped, whichever way a run ends.
struct LoadingGuard<'a> {
    state: &'a dyn StateTracker,
}

impl<'a> LoadingGuard<'a> {
    fn start(state: &'a dyn StateTracker) -> Self {
        state.set_loading(true);
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.set_loading(false);
    }
}

/// Marks a key as being analyzed until dropped.
struct InFlightClaim<'a> {
    key: AnalysisKey,
    in_flight: &'a Mutex<HashSet<AnalysisKey>>,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

struct Coordinator {
    client: Arc<dyn AnalysisClient>,
    history: Arc<dyn HistoryStore>,
    state: Arc<dyn StateTracker>,
    min_loading_duration: Duration,
    in_flight: Mutex<HashSet<AnalysisKey>>,
}

impl Coordinator {
    fn claim(&self, key: &AnalysisKey) -> Option<InFlightClaim<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            key: key.clone(),
            in_flight: &self.in_flight,
        })
    }

    #[instrument(skip_all, fields(kind = %kind, online = online))]
    async fn run(&self, text: &str, kind: AnalysisKind, online: bool, max_length: usize) -> RunOutcome {
        let mode = AnalysisMode::from_online(online);
        self.state.clear_error();

        if let Some(reason) = check_input(self.state.is_loading(), text, max_length) {
            info!("Validation failed or analysis in progress: {}. Request aborted.", reason);
            return RunOutcome::Blocked(reason);
        }

        let key = AnalysisKey::new(text, kind, mode);
        let Some(_claim) = self.claim(&key) else {
            info!("An identical analysis is already running. Request aborted.");
            return RunOutcome::Blocked(BlockReason::InProgress);
        };

        if let Some(existing) = self.history.find_and_promote(&key).await {
            debug!("Found existing successful analysis in history, no new analysis needed");
            self.state.set_loading(false);
            return RunOutcome::Promoted(existing);
        }

        let _loading = LoadingGuard::start(self.state.as_ref());
        let pending = PendingAnalysis::start(key);

        let result = match mode {
            AnalysisMode::Online => self.analyze_online(text, kind).await,
            AnalysisMode::Offline => self.analyze_offline(text, kind).await,
        };

        let record = Arc::new(pending.complete(result));
        self.history.add(record.clone()).await;
        RunOutcome::Completed(record)
    }

    async fn analyze_offline(&self, text: &str, kind: AnalysisKind) -> AnalysisResult {
        debug!("Performing offline analysis");
        let counts = count(text, kind);
        tokio::time::sleep(self.min_loading_duration).await;
        info!("Offline analysis completed");
        AnalysisResult::Success(counts)
    }

    async fn analyze_online(&self, text: &str, kind: AnalysisKind) -> AnalysisResult {
        debug!("Initiating online analysis request");
        let (response, _) = tokio::join!(
            self.client.fetch(text, kind),
            tokio::time::sleep(self.min_loading_duration)
        );

        match response {
            Ok(counts) => {
                info!("Online analysis request successful");
                AnalysisResult::Success(normalize_keys(counts))
            }
            Err(e) => {
                error!(status = e.status, "Online analysis failed: {:?}", e);
                let mut message = e.user_message();
                if message.trim().is_empty() {
                    message = GENERIC_ONLINE_FAILURE.to_string();
                }
                self.state.set_error(Some(message.clone()));
                AnalysisResult::Error(message)
            }
        }
    }

    async fn can_submit(
        &self,
        text: &str,
        kind: AnalysisKind,
        online: bool,
        max_length: usize,
    ) -> Submission {
        if let Some(reason) = check_input(self.state.is_loading(), text, max_length) {
            return Submission::Blocked(reason);
        }
        let key = AnalysisKey::new(text, kind, AnalysisMode::from_online(online));
        if self.history.contains_success(&key).await {
            return Submission::Blocked(BlockReason::Duplicate);
        }
        Submission::Ready
    }
}

/// Validates, deduplicates and runs analyses, recording every finished one
/// in history.
///
/// Background work started with [`AnalysisWorkflow::submit`] belongs to the
/// workflow and is aborted when it is dropped.
pub struct AnalysisWorkflow {
    core: Arc<Coordinator>,
    background: tokio::sync::Mutex<BackgroundRuns>,
}

/// Submitted runs. Finished tasks are moved into `finished` so their task
/// slots are freed before `wait_idle` collects the outcomes.
#[derive(Default)]
struct BackgroundRuns {
    tasks: JoinSet<RunOutcome>,
    finished: Vec<RunOutcome>,
}

impl BackgroundRuns {
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.collect(joined);
        }
    }

    fn collect(&mut self, joined: Result<RunOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => self.finished.push(outcome),
            Err(e) => warn!("Background analysis did not finish: {}", e),
        }
    }
}

impl AnalysisWorkflow {
    pub fn new(
        client: Arc<dyn AnalysisClient>,
        history: Arc<dyn HistoryStore>,
        state: Arc<dyn StateTracker>,
        min_loading_duration: Duration,
    ) -> Self {
        Self {
            core: Arc::new(Coordinator {
                client,
                history,
                state,
                min_loading_duration,
                in_flight: Mutex::default(),
            }),
            background: tokio::sync::Mutex::default(),
        }
    }

    pub fn history(&self) -> Arc<dyn HistoryStore> {
        self.core.history.clone()
    }

    pub fn state(&self) -> Arc<dyn StateTracker> {
        self.core.state.clone()
    }

    /// Runs one analysis to completion. Never fails: problems end up in the
    /// returned outcome, in history, or in the state's error slot.
    pub async fn run(
        &self,
        text: &str,
        kind: AnalysisKind,
        online: bool,
        max_length: usize,
    ) -> RunOutcome {
        self.core.run(text, kind, online, max_length).await
    }

    /// Whether `run` would start a new analysis. Has no side effects.
    pub async fn can_submit(
        &self,
        text: &str,
        kind: AnalysisKind,
        online: bool,
        max_length: usize,
    ) -> Submission {
        self.core.can_submit(text, kind, online, max_length).await
    }

    /// Starts `run` in the background. Outcomes are kept until `wait_idle`
    /// hands them out.
    pub async fn submit(&self, text: String, kind: AnalysisKind, online: bool, max_length: usize) {
        let core = self.core.clone();
        let mut background = self.background.lock().await;
        background.reap();
        background
            .tasks
            .spawn(async move { core.run(&text, kind, online, max_length).await });
    }

    /// Number of submitted analyses that have not finished yet.
    pub async fn running(&self) -> usize {
        let mut background = self.background.lock().await;
        background.reap();
        background.tasks.len()
    }

    /// Waits for every submitted analysis and returns their outcomes in
    /// completion order.
    pub async fn wait_idle(&self) -> Vec<RunOutcome> {
        let mut background = self.background.lock().await;
        while let Some(joined) = background.tasks.join_next().await {
            background.collect(joined);
        }
        std::mem::take(&mut background.finished)
    }

    /// Aborts all background analyses.
    pub async fn shutdown(&self) {
        self.background.lock().await.tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::history::InMemoryHistory;
    use crate::analysis::state::{AnalysisState, MockStateTracker};
    use crate::remote::prelude::{MockAnalysisClient, TransportError};
    use crate::shared::prelude::CharacterCounts;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    const FLOOR: Duration = Duration::from_millis(600);
    const MAX_LENGTH: usize = 250;

    struct Fixture {
        workflow: AnalysisWorkflow,
        history: Arc<InMemoryHistory>,
        state: Arc<AnalysisState>,
    }

    fn fixture(client: impl AnalysisClient + 'static) -> Fixture {
        let history = Arc::new(InMemoryHistory::unbounded());
        let state = Arc::new(AnalysisState::new());
        let workflow = AnalysisWorkflow::new(Arc::new(client), history.clone(), state.clone(), FLOOR);
        Fixture {
            workflow,
            history,
            state,
        }
    }

    fn counts(entries: &[(&str, u64)]) -> CharacterCounts {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// Answers after a fixed delay by counting locally.
    struct DelayedClient {
        latency: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AnalysisClient for DelayedClient {
        async fn fetch(
            &self,
            text: &str,
            kind: AnalysisKind,
        ) -> Result<CharacterCounts, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            Ok(count(text, kind))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_waits_for_minimum_duration() {
        let f = fixture(MockAnalysisClient::new());

        let started = Instant::now();
        let outcome = f
            .workflow
            .run("Hello World", AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;

        assert!(started.elapsed() >= FLOOR);
        let record = outcome.record().expect("a record").clone();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(
            AnalysisResult::Success(counts(&[("E", 1), ("O", 2)])),
            record.result
        );
        assert_eq!(AnalysisMode::Offline, record.mode);
        assert_eq!(1, f.history.records().await.len());
        assert!(!f.state.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_is_visible_while_running() {
        let f = fixture(MockAnalysisClient::new());
        let mut loading = f.state.subscribe_loading();

        f.workflow
            .submit("Hello".to_string(), AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;

        loading.changed().await.unwrap();
        assert!(*loading.borrow_and_update());

        f.workflow.wait_idle().await;
        assert!(!f.state.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_offline_is_promoted_without_delay() {
        let f = fixture(MockAnalysisClient::new());
        let first = f
            .workflow
            .run("Hello World", AnalysisKind::Consonants, false, MAX_LENGTH)
            .await;
        f.workflow
            .run("Other", AnalysisKind::Consonants, false, MAX_LENGTH)
            .await;

        let started = Instant::now();
        let second = f
            .workflow
            .run("Hello World", AnalysisKind::Consonants, false, MAX_LENGTH)
            .await;

        assert_eq!(Duration::ZERO, started.elapsed());
        let RunOutcome::Promoted(promoted) = second else {
            panic!("expected a promotion, got {:?}", second);
        };
        assert!(Arc::ptr_eq(first.record().unwrap(), &promoted));

        let records = f.history.records().await;
        assert_eq!(2, records.len());
        assert!(Arc::ptr_eq(&records[0], &promoted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_online_success_calls_client_once() {
        let mut client = MockAnalysisClient::new();
        client
            .expect_fetch()
            .times(1)
            .withf(|text, _| text.eq("Hello World"))
            .returning(|_, _| Ok(counts(&[("e", 1), ("o", 2)])));
        let f = fixture(client);

        let first = f
            .workflow
            .run("Hello World", AnalysisKind::Vowels, true, MAX_LENGTH)
            .await;
        let second = f
            .workflow
            .run("Hello World", AnalysisKind::Vowels, true, MAX_LENGTH)
            .await;

        assert!(matches!(first, RunOutcome::Completed(_)));
        assert!(matches!(second, RunOutcome::Promoted(_)));
        let records = f.history.records().await;
        assert_eq!(1, records.len());
        // keys from the server are upper-cased before they are stored
        assert_eq!(
            AnalysisResult::Success(counts(&[("E", 1), ("O", 2)])),
            records[0].result
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_online_runs_are_retried() {
        let mut client = MockAnalysisClient::new();
        client
            .expect_fetch()
            .times(2)
            .returning(|_, _| Err(TransportError::new(500, None)));
        let f = fixture(client);

        for _ in 0..2 {
            let outcome = f
                .workflow
                .run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH)
                .await;
            assert!(matches!(outcome, RunOutcome::Completed(_)));
            assert!(!outcome.is_success());
        }

        let records = f.history.records().await;
        assert_eq!(2, records.len());
        let expected =
            "Server error: Something went wrong on our end. Please try again later.".to_string();
        assert_eq!(AnalysisResult::Error(expected.clone()), records[0].result);
        assert_eq!(Some(expected), f.state.error_message());
        assert!(!f.state.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_server_message_records_status_text() {
        let mut client = MockAnalysisClient::new();
        client
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(TransportError::new(400, Some(" ".to_string()))));
        let f = fixture(client);

        f.workflow
            .run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH)
            .await;

        let expected =
            "Request failed with status 400. Invalid input or resource not found.".to_string();
        assert_eq!(Some(expected.clone()), f.state.error_message());
        assert_eq!(
            AnalysisResult::Error(expected),
            f.history.records().await[0].result
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_run_clears_previous_error() {
        let mut client = MockAnalysisClient::new();
        client
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(TransportError::connection("refused")));
        let f = fixture(client);

        f.workflow
            .run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH)
            .await;
        assert!(f.state.error_message().is_some());

        f.workflow
            .run("Hello", AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;
        assert_eq!(None, f.state.error_message());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_network_waits_for_floor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = fixture(DelayedClient {
            latency: Duration::from_millis(20),
            calls: calls.clone(),
        });

        let started = Instant::now();
        f.workflow
            .run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH)
            .await;

        assert_eq!(FLOOR, started.elapsed());
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_network_is_not_padded() {
        let latency = Duration::from_millis(1500);
        let f = fixture(DelayedClient {
            latency,
            calls: Arc::new(AtomicUsize::new(0)),
        });

        let started = Instant::now();
        let outcome = f
            .workflow
            .run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH)
            .await;

        assert_eq!(latency, started.elapsed());
        assert!(outcome.is_success());
        assert!(!f.state.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_is_blocked() {
        let f = fixture(MockAnalysisClient::new());
        let too_long = "a".repeat(11);

        let empty = f.workflow.run("  ", AnalysisKind::Vowels, true, 10).await;
        let long = f.workflow.run(&too_long, AnalysisKind::Vowels, true, 10).await;

        assert!(matches!(empty, RunOutcome::Blocked(BlockReason::EmptyInput)));
        assert!(matches!(
            long,
            RunOutcome::Blocked(BlockReason::TooLong { max_length: 10 })
        ));
        assert!(f.history.records().await.is_empty());
        assert_eq!(None, f.state.error_message());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_blocks_new_runs() {
        let f = fixture(MockAnalysisClient::new());
        f.state.set_loading(true);

        let outcome = f
            .workflow
            .run("Hello", AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;

        assert!(matches!(outcome, RunOutcome::Blocked(BlockReason::InProgress)));
        assert!(f.history.records().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_submit_precedence() {
        let f = fixture(MockAnalysisClient::new());
        let too_long = "a".repeat(11);
        let can_submit = |text: String| {
            let workflow = &f.workflow;
            async move { workflow.can_submit(&text, AnalysisKind::Vowels, false, 10).await }
        };

        assert_eq!(Submission::Ready, can_submit("hello".to_string()).await);

        f.workflow.run("hello", AnalysisKind::Vowels, false, 10).await;
        assert_eq!(
            Submission::Blocked(BlockReason::Duplicate),
            can_submit("hello".to_string()).await
        );
        assert_eq!(
            Submission::Blocked(BlockReason::TooLong { max_length: 10 }),
            can_submit(too_long.clone()).await
        );
        assert_eq!(
            Submission::Blocked(BlockReason::EmptyInput),
            can_submit(String::new()).await
        );

        f.state.set_loading(true);
        assert_eq!(
            Submission::Blocked(BlockReason::InProgress),
            can_submit("hello".to_string()).await
        );
        assert_eq!(
            Submission::Blocked(BlockReason::InProgress),
            can_submit(String::new()).await
        );

        // the query itself never touches history order or errors
        assert_eq!(1, f.history.records().await.len());
        assert_eq!(None, f.state.error_message());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_submissions() {
        let f = fixture(MockAnalysisClient::new());

        f.workflow
            .submit("first".to_string(), AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;
        f.workflow
            .submit("second".to_string(), AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;
        let outcomes = f.workflow.wait_idle().await;

        assert_eq!(2, outcomes.len());
        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, RunOutcome::Completed(_)))
            .count();
        let blocked = outcomes
            .iter()
            .filter(|o| matches!(o, RunOutcome::Blocked(BlockReason::InProgress)))
            .count();
        assert_eq!((1, 1), (completed, blocked));
        assert_eq!(1, f.history.records().await.len());
        assert!(!f.state.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_submissions_are_reaped_but_kept() {
        let f = fixture(MockAnalysisClient::new());

        f.workflow
            .submit("first".to_string(), AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;
        assert_eq!(1, f.workflow.running().await);
        tokio::time::sleep(FLOOR * 2).await;

        f.workflow
            .submit("second".to_string(), AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;
        assert_eq!(1, f.workflow.running().await);

        let outcomes = f.workflow.wait_idle().await;
        let texts: Vec<_> = outcomes
            .iter()
            .filter_map(|o| o.record().map(|r| r.text.clone()))
            .collect();
        assert_eq!(vec!["first".to_string(), "second".to_string()], texts);
        assert_eq!(0, f.workflow.running().await);
        assert!(f.workflow.wait_idle().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_concurrent_runs_are_rejected() {
        // a tracker that never reports loading, so only the in-flight set
        // can stop the second run
        let mut state = MockStateTracker::new();
        state.expect_clear_error().return_const(());
        state.expect_is_loading().return_const(false);
        state.expect_set_loading().return_const(());

        let calls = Arc::new(AtomicUsize::new(0));
        let history = Arc::new(InMemoryHistory::unbounded());
        let workflow = AnalysisWorkflow::new(
            Arc::new(DelayedClient {
                latency: Duration::from_millis(100),
                calls: calls.clone(),
            }),
            history.clone(),
            Arc::new(state),
            FLOOR,
        );

        let (first, second) = tokio::join!(
            workflow.run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH),
            workflow.run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH)
        );

        assert!(matches!(first, RunOutcome::Completed(_)));
        assert!(matches!(second, RunOutcome::Blocked(BlockReason::InProgress)));
        assert_eq!(1, calls.load(Ordering::SeqCst));

        // the claim is released once the first run is done
        let third = workflow
            .run("Hello", AnalysisKind::Vowels, true, MAX_LENGTH)
            .await;
        assert!(matches!(third, RunOutcome::Promoted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_and_clears_loading() {
        let f = fixture(MockAnalysisClient::new());

        f.workflow
            .submit("Hello".to_string(), AnalysisKind::Vowels, false, MAX_LENGTH)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.state.is_loading());

        f.workflow.shutdown().await;

        assert!(!f.state.is_loading());
        assert!(f.history.records().await.is_empty());
        assert!(f.workflow.wait_idle().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_shared_with_callers() {
        let f = fixture(MockAnalysisClient::new());
        f.workflow
            .run("abc", AnalysisKind::Consonants, false, MAX_LENGTH)
            .await;

        let records = f.workflow.history().records().await;
        assert_eq!(
            BTreeMap::from([("B".to_string(), 1), ("C".to_string(), 1)]),
            match &records[0].result {
                AnalysisResult::Success(c) => c.clone(),
                other => panic!("unexpected {:?}", other),
            }
        );
        assert!(!f.workflow.state().is_loading());
    }
}
