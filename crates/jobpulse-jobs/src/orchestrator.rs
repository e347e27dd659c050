use crate::{chunk, JobError, JobStore};
use chrono::Utc;
use jobpulse_ai::Classifier;
use jobpulse_core::{ClassificationRecord, JobState, JobStatus, UserKey};
use jobpulse_mail::{MailSource, Normalizer};
use jobpulse_security::{Credential, CredentialResolution, CredentialStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    /// Pause between consecutive classifier calls of one run.
    pub pacing_delay: Duration,
    pub normalizer: Normalizer,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            pacing_delay: Duration::from_secs(1),
            normalizer: Normalizer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { run_id: Uuid },
    AlreadyProcessing,
    NeedsAuth { auth_url: String },
}

/// What a poller sees. `results` is only present once the run is done and
/// `error` only once it failed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobReport {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ClassificationRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    fn not_started() -> Self {
        Self {
            status: JobStatus::NotStarted,
            results: None,
            error: None,
        }
    }
}

impl From<JobState> for JobReport {
    fn from(state: JobState) -> Self {
        match state.status {
            JobStatus::Done => Self {
                status: JobStatus::Done,
                results: Some(state.results),
                error: None,
            },
            JobStatus::Error => Self {
                status: JobStatus::Error,
                results: None,
                error: Some(
                    state
                        .error_detail
                        .unwrap_or_else(|| "run failed without detail".to_string()),
                ),
            },
            status => Self {
                status,
                results: None,
                error: None,
            },
        }
    }
}

/// Starts classification runs in the background and tracks one state per
/// user. At most one run per user is in flight at any time.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    credentials: Arc<CredentialStore>,
    mail: Arc<dyn MailSource>,
    classifier: Classifier,
    jobs: Arc<dyn JobStore>,
    settings: PipelineSettings,
    start_locks: Mutex<HashMap<UserKey, Arc<Mutex<()>>>>,
}

impl JobOrchestrator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        mail: Arc<dyn MailSource>,
        classifier: Classifier,
        jobs: Arc<dyn JobStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                mail,
                classifier,
                jobs,
                settings,
                start_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Starts a run unless one is already processing for this user.
    ///
    /// The status check, credential resolution and the switch to
    /// `processing` happen under a per-user lock, so racing callers cannot
    /// schedule two runs. A user without usable credentials gets an
    /// authorization URL and their state is left untouched. A failed token
    /// refresh is recorded as the run's error and also returned.
    pub async fn start(&self, user_key: &UserKey, limit: usize) -> Result<StartOutcome, JobError> {
        let lock = self.inner.start_lock(user_key).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.start_locked(user_key, limit).await
        };
        self.inner.release_start_lock(user_key, lock).await;
        outcome
    }

    async fn start_locked(&self, user_key: &UserKey, limit: usize) -> Result<StartOutcome, JobError> {
        if let Some(state) = self.inner.jobs.get(user_key).await {
            if state.status == JobStatus::Processing {
                tracing::debug!(user_key = %user_key, "run already processing");
                return Ok(StartOutcome::AlreadyProcessing);
            }
        }

        let run_id = Uuid::new_v4();
        let credential = match self.inner.credentials.resolve(user_key).await {
            Ok(CredentialResolution::Authenticated(credential)) => credential,
            Ok(CredentialResolution::NeedsAuth { auth_url }) => {
                tracing::info!(user_key = %user_key, "authorization required before run");
                return Ok(StartOutcome::NeedsAuth { auth_url });
            }
            Err(err) => {
                tracing::warn!(user_key = %user_key, %run_id, "credential resolution failed: {err}");
                let state = JobState::processing(user_key.clone(), run_id, Utc::now())
                    .failed(err.to_string(), Utc::now());
                self.inner.jobs.put(state).await;
                return Err(err.into());
            }
        };

        let state = JobState::processing(user_key.clone(), run_id, Utc::now());
        self.inner.jobs.put(state.clone()).await;
        tracing::info!(user_key = %user_key, %run_id, limit, "run started");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.supervise(state, credential, limit).await;
        });

        Ok(StartOutcome::Started { run_id })
    }

    /// Never fails: unknown users report `not_started`.
    pub async fn poll(&self, user_key: &UserKey) -> JobReport {
        match self.inner.jobs.get(user_key).await {
            Some(state) => JobReport::from(state),
            None => JobReport::not_started(),
        }
    }

    /// Completes the OAuth callback for `user_key`. Job state is not touched.
    pub async fn complete_auth(&self, code: &str, user_key: &UserKey) -> Result<(), JobError> {
        self.inner.credentials.complete_auth(code, user_key).await?;
        Ok(())
    }
}

impl Inner {
    async fn start_lock(&self, user_key: &UserKey) -> Arc<Mutex<()>> {
        let mut locks = self.start_locks.lock().await;
        locks
            .entry(user_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the map entry once no other caller holds or waits on it.
    async fn release_start_lock(&self, user_key: &UserKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.start_locks.lock().await;
        let is_mapped = locks
            .get(user_key)
            .is_some_and(|current| Arc::ptr_eq(current, &lock));
        if is_mapped && Arc::strong_count(&lock) == 2 {
            locks.remove(user_key);
        }
    }

    /// Runs the pipeline on its own task so that even a panic ends in a
    /// terminal state instead of a run stuck in `processing`.
    async fn supervise(self: Arc<Self>, state: JobState, credential: Credential, limit: usize) {
        let worker = {
            let inner = self.clone();
            tokio::spawn(async move { inner.run_pipeline(&credential, limit).await })
        };

        let run_id = state.run_id;
        let user_key = state.user_key.clone();
        let finished = match worker.await {
            Ok(Ok(results)) => {
                tracing::info!(user_key = %user_key, run_id = ?run_id, results = results.len(), "run done");
                state.completed(results, Utc::now())
            }
            Ok(Err(err)) => {
                tracing::error!(user_key = %user_key, run_id = ?run_id, "run failed: {err}");
                state.failed(err.to_string(), Utc::now())
            }
            Err(join_err) => {
                tracing::error!(user_key = %user_key, run_id = ?run_id, "run aborted: {join_err}");
                state.failed(format!("pipeline task aborted: {join_err}"), Utc::now())
            }
        };

        if !self.jobs.put_if_current(finished).await {
            tracing::warn!(user_key = %user_key, run_id = ?run_id, "run outcome discarded, state was replaced");
        }
    }

    async fn run_pipeline(
        &self,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<ClassificationRecord>, JobError> {
        let raw = self.mail.fetch_recent(credential, limit).await?;
        let normalized = self.settings.normalizer.normalize_all(&raw);
        let batches = chunk(&normalized, self.settings.batch_size);
        tracing::debug!(
            user_key = %credential.user_key,
            fetched = raw.len(),
            batches = batches.len(),
            "mail normalized"
        );

        let mut results = Vec::new();
        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.settings.pacing_delay.is_zero() {
                tokio::time::sleep(self.settings.pacing_delay).await;
            }

            let records = self.classifier.classify(batch).await?;
            tracing::debug!(
                user_key = %credential.user_key,
                batch = index,
                kept = records.len(),
                "batch classified"
            );
            results.extend(records);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryJobStore;
    use async_trait::async_trait;
    use jobpulse_ai::{AiError, CompletionBackend, CompletionRequest};
    use jobpulse_core::{OAuthProfile, RawEmailMessage, UserToken, Verdict};
    use jobpulse_mail::MailError;
    use jobpulse_security::{
        AuthFlow, MemoryTokenStore, SecurityError, TokenEndpoint, TokenGrant,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use url::Url;

    #[derive(Default)]
    struct FakeEndpoint {
        reject_refresh: bool,
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SecurityError> {
            Ok(TokenGrant {
                access_token: format!("access-for-{code}"),
                refresh_token: Some("refresh".to_string()),
                expires_in_secs: Some(3600),
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, SecurityError> {
            if self.reject_refresh {
                return Err(SecurityError::RefreshFailed("invalid_grant".to_string()));
            }
            Ok(TokenGrant {
                access_token: "refreshed".to_string(),
                refresh_token: None,
                expires_in_secs: Some(3600),
            })
        }
    }

    enum MailBehaviour {
        Messages(usize),
        Fail,
        Panic,
    }

    struct FakeMail {
        behaviour: MailBehaviour,
        gate: Option<Arc<Semaphore>>,
        calls: AtomicUsize,
    }

    impl FakeMail {
        fn new(behaviour: MailBehaviour) -> Self {
            Self {
                behaviour,
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MailSource for FakeMail {
        async fn fetch_recent(
            &self,
            _credential: &Credential,
            limit: usize,
        ) -> Result<Vec<RawEmailMessage>, MailError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }

            match self.behaviour {
                MailBehaviour::Messages(count) => Ok((0..count.min(limit))
                    .map(|i| RawEmailMessage {
                        id: format!("m{i}"),
                        from: format!("Sender {i} <s{i}@corp.example>"),
                        subject: format!("Subject {i}"),
                        date: format!("2025-10-{:02}", i + 1),
                        snippet: format!("Body of message {i}"),
                    })
                    .collect()),
                MailBehaviour::Fail => Err(MailError::Api(
                    "Gmail message listing failed with status 503".to_string(),
                )),
                MailBehaviour::Panic => panic!("mail source exploded"),
            }
        }
    }

    struct QueuedBackend {
        replies: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl QueuedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|reply| reply.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for QueuedBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok("[]".to_string()))
                .map_err(AiError::Upstream)
        }
    }

    struct Harness {
        orchestrator: JobOrchestrator,
        mail: Arc<FakeMail>,
        backend: Arc<QueuedBackend>,
    }

    fn profile() -> OAuthProfile {
        OAuthProfile {
            client_id: "client-123".to_string(),
            auth_url: Url::parse("https://accounts.example.com/o/oauth2/auth").expect("url"),
            token_url: Url::parse("https://oauth2.example.com/token").expect("url"),
            redirect_url: Url::parse("http://localhost:8000/auth/callback").expect("url"),
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        }
    }

    fn harness_with(endpoint: FakeEndpoint, mail: FakeMail, backend: QueuedBackend, pacing: Duration) -> Harness {
        let auth = AuthFlow::new(profile(), Arc::new(endpoint)).expect("auth flow");
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(auth),
            CredentialStore::DEFAULT_MAX_RECORDS,
        ));
        let mail = Arc::new(mail);
        let backend = Arc::new(backend);
        let orchestrator = JobOrchestrator::new(
            credentials,
            mail.clone(),
            Classifier::new(backend.clone()),
            Arc::new(MemoryJobStore::new()),
            PipelineSettings {
                pacing_delay: pacing,
                ..PipelineSettings::default()
            },
        );

        Harness {
            orchestrator,
            mail,
            backend,
        }
    }

    fn harness(mail: FakeMail, backend: QueuedBackend) -> Harness {
        harness_with(FakeEndpoint::default(), mail, backend, Duration::ZERO)
    }

    fn key(raw: &str) -> UserKey {
        UserKey::parse(raw).expect("key")
    }

    async fn authorize(harness: &Harness, user: &UserKey) {
        harness
            .orchestrator
            .credentials()
            .save(&UserToken {
                user_key: user.clone(),
                access_token: "access".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_at: None,
            })
            .await
            .expect("seed token");
    }

    async fn wait_for_terminal(orchestrator: &JobOrchestrator, user: &UserKey) -> JobReport {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let report = orchestrator.poll(user).await;
                if report.status.is_terminal() {
                    return report;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run reached a terminal status")
    }

    fn real_update(company: &str, verdict: &str) -> String {
        format!(
            "{{\"company_name\": \"{company}\", \"date\": \"2025-10-14\", \"verdict\": \"{verdict}\", \"is_real_job_update\": true}}"
        )
    }

    const NOT_AN_UPDATE: &str =
        "{\"company_name\": \"Board\", \"date\": \"\", \"verdict\": \"unknown\", \"is_real_job_update\": false}";

    #[tokio::test]
    async fn unknown_user_polls_not_started() {
        let harness = harness(FakeMail::new(MailBehaviour::Messages(0)), QueuedBackend::new(vec![]));
        let report = harness.orchestrator.poll(&key("nobody@x.com")).await;
        assert_eq!(report, JobReport::not_started());
    }

    #[tokio::test]
    async fn start_without_token_returns_auth_url_then_starts_after_callback() {
        let harness = harness(FakeMail::new(MailBehaviour::Messages(0)), QueuedBackend::new(vec![]));
        let user = key("a@x.com");

        let outcome = harness.orchestrator.start(&user, 10).await.expect("start");
        let auth_url = match outcome {
            StartOutcome::NeedsAuth { auth_url } => auth_url,
            other => panic!("expected NeedsAuth, got {other:?}"),
        };
        assert!(auth_url.contains("state=a%40x.com"));
        assert_eq!(harness.orchestrator.poll(&user).await.status, JobStatus::NotStarted);
        assert_eq!(harness.mail.calls.load(Ordering::SeqCst), 0);

        harness
            .orchestrator
            .complete_auth("code-1", &user)
            .await
            .expect("callback");
        let outcome = harness.orchestrator.start(&user, 10).await.expect("start");
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert_eq!(wait_for_terminal(&harness.orchestrator, &user).await.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn seven_messages_with_two_real_updates_yield_two_results() {
        let first = format!(
            "[{}, {NOT_AN_UPDATE}, {NOT_AN_UPDATE}, {NOT_AN_UPDATE}, {NOT_AN_UPDATE}]",
            real_update("Acme", "application_received")
        );
        let second = format!("Here you go:\n[{NOT_AN_UPDATE}, {}]", real_update("Globex", "rejected"));
        let harness = harness(
            FakeMail::new(MailBehaviour::Messages(7)),
            QueuedBackend::new(vec![Ok(first.as_str()), Ok(second.as_str())]),
        );
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        let outcome = harness.orchestrator.start(&user, 10).await.expect("start");
        assert!(matches!(outcome, StartOutcome::Started { .. }));

        let report = wait_for_terminal(&harness.orchestrator, &user).await;
        assert_eq!(report.status, JobStatus::Done);
        let results = report.results.expect("results present when done");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].company_name, "Acme");
        assert_eq!(results[0].verdict, Verdict::ApplicationReceived);
        assert_eq!(results[1].company_name, "Globex");
        assert_eq!(results[1].verdict, Verdict::Rejected);
        assert_eq!(harness.backend.calls.load(Ordering::SeqCst), 2);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn degraded_batch_still_completes_the_run() {
        let second = format!("[{}]", real_update("Globex", "oa_received"));
        let harness = harness(
            FakeMail::new(MailBehaviour::Messages(7)),
            QueuedBackend::new(vec![Ok("Sure! Here's your JSON: [oops"), Ok(second.as_str())]),
        );
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        harness.orchestrator.start(&user, 10).await.expect("start");
        let report = wait_for_terminal(&harness.orchestrator, &user).await;

        assert_eq!(report.status, JobStatus::Done);
        let results = report.results.expect("results");
        assert_eq!(results.len(), 6);
        for (i, record) in results.iter().take(5).enumerate() {
            assert_eq!(record.verdict, Verdict::Unknown);
            assert!(!record.is_real_job_update);
            assert_eq!(record.company_name, format!("Sender {i} <s{i}@corp.example>"));
        }
        assert_eq!(results[5].company_name, "Globex");
    }

    #[tokio::test]
    async fn duplicate_start_while_processing_schedules_one_run() {
        let gate = Arc::new(Semaphore::new(0));
        let mut mail = FakeMail::new(MailBehaviour::Messages(3));
        mail.gate = Some(gate.clone());
        let harness = harness(mail, QueuedBackend::new(vec![]));
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        let first = harness.orchestrator.start(&user, 10).await.expect("start");
        assert!(matches!(first, StartOutcome::Started { .. }));

        for _ in 0..2 {
            let again = harness.orchestrator.start(&user, 10).await.expect("start");
            assert_eq!(again, StartOutcome::AlreadyProcessing);
        }
        let report = harness.orchestrator.poll(&user).await;
        assert_eq!(report.status, JobStatus::Processing);
        assert!(report.results.is_none());

        gate.add_permits(1);
        assert_eq!(wait_for_terminal(&harness.orchestrator, &user).await.status, JobStatus::Done);
        assert_eq!(harness.mail.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn racing_starts_schedule_exactly_one_run() {
        let gate = Arc::new(Semaphore::new(0));
        let mut mail = FakeMail::new(MailBehaviour::Messages(1));
        mail.gate = Some(gate.clone());
        let harness = harness(mail, QueuedBackend::new(vec![]));
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        let (a, b, c) = tokio::join!(
            harness.orchestrator.start(&user, 5),
            harness.orchestrator.start(&user, 5),
            harness.orchestrator.start(&user, 5),
        );
        let started = [a, b, c]
            .into_iter()
            .map(|outcome| outcome.expect("start"))
            .filter(|outcome| matches!(outcome, StartOutcome::Started { .. }))
            .count();
        assert_eq!(started, 1);

        gate.add_permits(1);
        wait_for_terminal(&harness.orchestrator, &user).await;
        assert_eq!(harness.mail.calls.load(Ordering::SeqCst), 1);
        assert!(harness.orchestrator.inner.start_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn finished_run_can_be_restarted() {
        let harness = harness(FakeMail::new(MailBehaviour::Messages(2)), QueuedBackend::new(vec![]));
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        let StartOutcome::Started { run_id: first } =
            harness.orchestrator.start(&user, 10).await.expect("start")
        else {
            panic!("first start did not start");
        };
        wait_for_terminal(&harness.orchestrator, &user).await;

        let StartOutcome::Started { run_id: second } =
            harness.orchestrator.start(&user, 10).await.expect("restart")
        else {
            panic!("restart did not start");
        };
        assert_ne!(first, second);
        wait_for_terminal(&harness.orchestrator, &user).await;
        assert_eq!(harness.mail.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mail_failure_errors_the_run_without_partial_results() {
        let harness = harness(FakeMail::new(MailBehaviour::Fail), QueuedBackend::new(vec![]));
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        harness.orchestrator.start(&user, 10).await.expect("start");
        let report = wait_for_terminal(&harness.orchestrator, &user).await;

        assert_eq!(report.status, JobStatus::Error);
        assert!(report.results.is_none());
        assert!(report.error.expect("detail").contains("503"));
    }

    #[tokio::test]
    async fn classifier_transport_failure_errors_the_run() {
        let first = format!("[{}]", real_update("Acme", "referred"));
        let harness = harness(
            FakeMail::new(MailBehaviour::Messages(7)),
            QueuedBackend::new(vec![Ok(first.as_str()), Err("connection reset")]),
        );
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        harness.orchestrator.start(&user, 10).await.expect("start");
        let report = wait_for_terminal(&harness.orchestrator, &user).await;

        assert_eq!(report.status, JobStatus::Error);
        assert!(report.results.is_none());
        assert!(report.error.expect("detail").contains("connection reset"));
    }

    #[tokio::test]
    async fn panicking_pipeline_ends_in_error() {
        let harness = harness(FakeMail::new(MailBehaviour::Panic), QueuedBackend::new(vec![]));
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        harness.orchestrator.start(&user, 10).await.expect("start");
        let report = wait_for_terminal(&harness.orchestrator, &user).await;
        assert_eq!(report.status, JobStatus::Error);
        assert!(report.error.expect("detail").contains("aborted"));
    }

    #[tokio::test]
    async fn refresh_failure_is_recorded_as_run_error() {
        let harness = harness_with(
            FakeEndpoint { reject_refresh: true },
            FakeMail::new(MailBehaviour::Messages(1)),
            QueuedBackend::new(vec![]),
            Duration::ZERO,
        );
        let user = key("a@x.com");
        harness
            .orchestrator
            .credentials()
            .save(&UserToken {
                user_key: user.clone(),
                access_token: "stale".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
            })
            .await
            .expect("seed token");

        let err = harness.orchestrator.start(&user, 10).await.expect_err("must fail");
        assert!(matches!(err, JobError::Credential(SecurityError::RefreshFailed(_))));

        let report = harness.orchestrator.poll(&user).await;
        assert_eq!(report.status, JobStatus::Error);
        assert!(report.error.expect("detail").contains("invalid_grant"));
        assert_eq!(harness.mail.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batches_are_paced() {
        let harness = harness_with(
            FakeEndpoint::default(),
            FakeMail::new(MailBehaviour::Messages(11)),
            QueuedBackend::new(vec![]),
            Duration::from_millis(30),
        );
        let user = key("a@x.com");
        authorize(&harness, &user).await;

        let started = tokio::time::Instant::now();
        harness.orchestrator.start(&user, 20).await.expect("start");
        wait_for_terminal(&harness.orchestrator, &user).await;

        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(harness.backend.calls.load(Ordering::SeqCst), 3);
    }
}
