use crate::CoreError;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use url::Url;
use uuid::Uuid;

const MAX_USER_KEY_LEN: usize = 320;

/// Identifier of a mailbox owner. Correlates credentials, job state and
/// OAuth callbacks, so it is normalized once at the boundary and used as a
/// map key everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserKey(String);

impl UserKey {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(CoreError::InvalidUserKey("user key is empty".to_string()));
        }
        if normalized.len() > MAX_USER_KEY_LEN {
            return Err(CoreError::InvalidUserKey(format!(
                "user key exceeds {MAX_USER_KEY_LEN} characters"
            )));
        }

        let is_mailbox = mailbox_pattern()
            .as_ref()
            .is_some_and(|re| re.is_match(&normalized));
        if !is_mailbox {
            return Err(CoreError::InvalidUserKey(format!(
                "`{normalized}` is not a mailbox address"
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn mailbox_pattern() -> &'static Option<Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserKey> for String {
    fn from(value: UserKey) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProfile {
    pub client_id: String,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: Url,
    pub scopes: Vec<String>,
}

/// One stored OAuth grant per user.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserToken {
    pub user_key: UserKey,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserToken {
    /// A token without a recorded expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at.is_some_and(|at| now + skew >= at)
    }
}

impl fmt::Debug for UserToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserToken")
            .field("user_key", &self.user_key)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Message headers and snippet as handed over by the mail provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawEmailMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub snippet: String,
}

/// Bounded, classifier-ready view of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedEmail {
    pub subject: String,
    pub from: String,
    pub date: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    ApplicationReceived,
    Referred,
    OaReceived,
    InterviewScheduled,
    Rejected,
    OfferReceived,
    Unknown,
}

impl Verdict {
    pub const ALL: [Verdict; 7] = [
        Verdict::ApplicationReceived,
        Verdict::Referred,
        Verdict::OaReceived,
        Verdict::InterviewScheduled,
        Verdict::Rejected,
        Verdict::OfferReceived,
        Verdict::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::ApplicationReceived => "application_received",
            Verdict::Referred => "referred",
            Verdict::OaReceived => "oa_received",
            Verdict::InterviewScheduled => "interview_scheduled",
            Verdict::Rejected => "rejected",
            Verdict::OfferReceived => "offer_received",
            Verdict::Unknown => "unknown",
        }
    }

    /// Maps a free-text label onto the closed set; anything unrecognized is
    /// `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|verdict| verdict.as_str() == label)
            .unwrap_or(Verdict::Unknown)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationRecord {
    pub company_name: String,
    pub date: String,
    pub verdict: Verdict,
    pub is_real_job_update: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// Latest classification run of one user. Results are only populated once
/// the run is `Done`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobState {
    pub user_key: UserKey,
    pub status: JobStatus,
    pub run_id: Option<Uuid>,
    pub results: Vec<ClassificationRecord>,
    pub error_detail: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn not_started(user_key: UserKey) -> Self {
        Self {
            user_key,
            status: JobStatus::NotStarted,
            run_id: None,
            results: Vec::new(),
            error_detail: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn processing(user_key: UserKey, run_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_key,
            status: JobStatus::Processing,
            run_id: Some(run_id),
            results: Vec::new(),
            error_detail: None,
            started_at: Some(now),
            finished_at: None,
        }
    }

    pub fn completed(mut self, results: Vec<ClassificationRecord>, now: DateTime<Utc>) -> Self {
        self.status = JobStatus::Done;
        self.results = results;
        self.error_detail = None;
        self.finished_at = Some(now);
        self
    }

    pub fn failed(mut self, detail: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.status = JobStatus::Error;
        self.results.clear();
        self.error_detail = Some(detail.into());
        self.finished_at = Some(now);
        self
    }
}
