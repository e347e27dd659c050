use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("credential error: {0}")]
    Credential(#[from] jobpulse_security::SecurityError),
    #[error("mail source error: {0}")]
    Mail(#[from] jobpulse_mail::MailError),
    #[error("classifier error: {0}")]
    Classifier(#[from] jobpulse_ai::AiError),
}
