//! Input normalization and validation.
//!
//! A [`Pipeline`] is an ordered list of steps. Each step takes the value,
//! returns it (possibly normalized) or a message describing why it is invalid.
//! The first failing step stops the pipeline.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

pub type Step<T> = fn(T) -> Result<T, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub struct Pipeline<T> {
    field: &'static str,
    steps: Vec<Step<T>>,
}

impl<T> Pipeline<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: Step<T>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn run(&self, value: T) -> Result<T, ValidationError> {
        self.steps.iter().try_fold(value, |value, step| {
            step(value).map_err(|message| ValidationError {
                field: self.field,
                message,
            })
        })
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("field", &self.field)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Trim and collapse runs of whitespace to a single space.
pub fn trim_whitespace(value: String) -> Result<String, String> {
    Ok(value.split_whitespace().collect::<Vec<_>>().join(" "))
}

pub fn require_non_empty(value: String) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("must not be empty".into())
    } else {
        Ok(value)
    }
}

pub fn reject_unsafe_html(value: String) -> Result<String, String> {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_markup = UNSAFE.get_or_init(|| {
        Regex::new(r"(?i)<\s*(script|iframe|object|embed|link|meta)\b|javascript:|\bon\w+\s*=")
            .expect("valid static regex")
    });
    if unsafe_markup.is_match(&value) {
        Err("contains potentially unsafe HTML content".into())
    } else {
        Ok(value)
    }
}

pub fn capitalize_words(value: String) -> Result<String, String> {
    let words: Vec<String> = value
        .split(' ')
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    Ok(words.join(" "))
}

pub fn normalize_email(value: String) -> Result<String, String> {
    let email = value.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err("must be a valid email address".into())
    }
}

/// Keep digits and a single leading `+`.
pub fn normalize_phone(value: String) -> Result<String, String> {
    let trimmed = value.trim();
    let mut phone = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        phone.push('+');
    }
    phone.extend(trimmed.chars().filter(char::is_ascii_digit));
    if phone.trim_start_matches('+').is_empty() {
        Err("must contain digits".into())
    } else {
        Ok(phone)
    }
}

/// A letter followed by six or seven digits, e.g. `A1234567`.
pub fn parkrun_id_format(value: String) -> Result<String, String> {
    static PARKRUN_ID: OnceLock<Regex> = OnceLock::new();
    let id = value.trim().to_uppercase();
    let pattern =
        PARKRUN_ID.get_or_init(|| Regex::new(r"^[A-Z]\d{6,7}$").expect("valid static regex"));
    if pattern.is_match(&id) {
        Ok(id)
    } else {
        Err("must be a valid Parkrun ID (e.g., A1234567)".into())
    }
}
