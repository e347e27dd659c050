mod error;
mod normalize;
mod source;

pub use error::MailError;
pub use normalize::{Normalizer, SNIPPET_SEPARATOR};
pub use source::{GmailMailSource, MailSource};
