use jobpulse_core::{NormalizedEmail, RawEmailMessage};

const MAX_SUBJECT_CHARS: usize = 200;
const MAX_FROM_CHARS: usize = 100;

pub const SNIPPET_SEPARATOR: &str = "\n...\n";

/// Bounds message fields before they are placed in a prompt. Lengths are
/// counted in characters, never bytes.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    head_chars: usize,
    tail_chars: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(300, 200)
    }
}

impl Normalizer {
    pub fn new(head_chars: usize, tail_chars: usize) -> Self {
        Self {
            head_chars,
            tail_chars,
        }
    }

    pub fn normalize(&self, raw: &RawEmailMessage) -> NormalizedEmail {
        NormalizedEmail {
            subject: truncate_chars(&raw.subject, MAX_SUBJECT_CHARS),
            from: truncate_chars(&raw.from, MAX_FROM_CHARS),
            date: raw.date.clone(),
            body: self.snippet(&raw.snippet),
        }
    }

    pub fn normalize_all(&self, raw: &[RawEmailMessage]) -> Vec<NormalizedEmail> {
        raw.iter().map(|message| self.normalize(message)).collect()
    }

    /// Keeps the opening and the closing of the text and drops the middle,
    /// where status mails rarely put the verdict.
    fn snippet(&self, text: &str) -> String {
        let total = text.chars().count();
        if total <= self.head_chars + self.tail_chars {
            return text.to_string();
        }

        let head = text.chars().take(self.head_chars).collect::<String>();
        let tail = text.chars().skip(total - self.tail_chars).collect::<String>();
        format!("{head}{SNIPPET_SEPARATOR}{tail}")
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
