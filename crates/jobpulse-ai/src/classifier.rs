use crate::{parse_json_array, AiError, CompletionBackend, CompletionRequest, ExtractionError};
use jobpulse_core::{ClassificationRecord, NormalizedEmail, Verdict};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const UNKNOWN_COMPANY: &str = "Unknown";

/// Turns batches of normalized mail into job-status records via an
/// untrusted completion model.
#[derive(Clone)]
pub struct Classifier {
    backend: Arc<dyn CompletionBackend>,
    temperature: f32,
    max_tokens: u32,
}

impl Classifier {
    pub const DEFAULT_MAX_TOKENS: u32 = 2000;

    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            temperature: 0.0,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_decoding(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Classifies one batch.
    ///
    /// Unusable model output never fails the call: it degrades to one
    /// `unknown` record per input email. Only a transport failure of the
    /// backend is returned as an error. The result is never longer than
    /// `batch`.
    pub async fn classify(&self, batch: &[NormalizedEmail]) -> Result<Vec<ClassificationRecord>, AiError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let request = CompletionRequest {
            prompt: build_prompt(batch)?,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let reply = self.backend.complete(&request).await?;
        tracing::debug!(batch_len = batch.len(), reply = %reply, "raw classifier reply");

        match interpret_reply(&reply, batch.len()) {
            Ok(records) => {
                tracing::debug!(
                    batch_len = batch.len(),
                    kept = records.len(),
                    "classifier reply parsed"
                );
                Ok(records)
            }
            Err(reason) => {
                tracing::warn!(
                    batch_len = batch.len(),
                    %reason,
                    "classifier reply unusable, degrading batch"
                );
                Ok(fallback_records(batch))
            }
        }
    }
}

/// Degraded output for a batch whose reply could not be used.
pub fn fallback_records(batch: &[NormalizedEmail]) -> Vec<ClassificationRecord> {
    batch
        .iter()
        .map(|email| ClassificationRecord {
            company_name: non_empty(&email.from).unwrap_or(UNKNOWN_COMPANY).to_string(),
            date: email.date.clone(),
            verdict: Verdict::Unknown,
            is_real_job_update: false,
        })
        .collect()
}

fn interpret_reply(reply: &str, batch_len: usize) -> Result<Vec<ClassificationRecord>, ExtractionError> {
    let items = parse_json_array(reply)?;
    Ok(items
        .iter()
        .take(batch_len)
        .map(record_from_value)
        .filter(|record| record.is_real_job_update)
        .collect())
}

/// Missing or mistyped fields fall back to their defaults; non-object
/// elements therefore become non-updates.
fn record_from_value(value: &Value) -> ClassificationRecord {
    let text = |key: &str| value.get(key).and_then(Value::as_str);

    ClassificationRecord {
        company_name: text("company_name")
            .and_then(non_empty)
            .unwrap_or(UNKNOWN_COMPANY)
            .to_string(),
        date: text("date").unwrap_or_default().trim().to_string(),
        verdict: text("verdict").map(Verdict::from_label).unwrap_or(Verdict::Unknown),
        is_real_job_update: value.get("is_real_job_update").and_then(Value::as_bool) == Some(true),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[derive(Serialize)]
struct PromptEmail<'a> {
    index: usize,
    from: &'a str,
    subject: &'a str,
    date: &'a str,
    body: &'a str,
}

fn build_prompt(batch: &[NormalizedEmail]) -> Result<String, AiError> {
    let emails = batch
        .iter()
        .enumerate()
        .map(|(index, email)| PromptEmail {
            index,
            from: &email.from,
            subject: &email.subject,
            date: &email.date,
            body: &email.body,
        })
        .collect::<Vec<_>>();
    let emails = serde_json::to_string_pretty(&emails)?;

    let verdicts = Verdict::ALL
        .iter()
        .map(Verdict::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "You are an API that classifies job-application emails. You MUST return valid JSON only.\n\
         \n\
         Return a JSON array with one element per email, in the same order.\n\
         Each element must have exactly these keys:\n\
         - company_name (string): the hiring company, not the job board or recruiter platform\n\
         - date (string): the email date as given\n\
         - verdict (string): one of {verdicts}\n\
         - is_real_job_update (boolean)\n\
         \n\
         is_real_job_update is true ONLY when the email is a direct update about an application \
         the recipient submitted (confirmation, referral, online assessment, interview, rejection, offer).\n\
         It MUST be false for job listings, job alerts, newsletters, promotions, recruiter outreach, \
         course or event marketing, and whenever you are not sure.\n\
         When is_real_job_update is false, use verdict \"unknown\".\n\
         \n\
         Rules:\n\
         - NEVER return text outside the JSON array\n\
         - NEVER return markdown\n\
         - NEVER explain anything\n\
         \n\
         Emails:\n\
         {emails}\n"
    ))
}
