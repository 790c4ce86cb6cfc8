//! Operator prompting.
//!
//! A [`Prompter`] supplies raw answers; [`collect`] validates them and keeps
//! asking until one is accepted. Validation errors are reported back to the
//! prompter and never leave the loop, except when the caller bounds the
//! number of attempts.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::validate::{Field, FieldRules, ValidationError};

/// Source of raw answers.
pub trait Prompter: Send {
    /// Ask for a field. `Ok(None)` means input is closed.
    fn ask(&mut self, field: Field, rules: &FieldRules) -> io::Result<Option<String>>;

    /// Tell the operator why an answer was rejected.
    fn reject(&mut self, field: Field, error: &ValidationError);
}

/// Ask for `field` until a valid answer arrives.
///
/// `max_attempts` of `None` keeps asking forever; `Some(n)` gives up after
/// `n` rejected answers with [`CoreError::InputExhausted`].
pub fn collect(
    prompter: &mut dyn Prompter,
    field: Field,
    rules: &FieldRules,
    max_attempts: Option<u32>,
) -> CoreResult<String> {
    let mut attempts = 0u32;
    loop {
        let Some(raw) = prompter.ask(field, rules)? else {
            return Err(CoreError::InputClosed(field.to_string()));
        };
        attempts += 1;

        match field.validate(&raw, rules) {
            Ok(value) => {
                debug!("Accepted {} after {} attempt(s)", field, attempts);
                return Ok(value);
            }
            Err(e) => {
                prompter.reject(field, &e);
                if max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(CoreError::InputExhausted {
                        field: field.to_string(),
                        attempts,
                    });
                }
            }
        }
    }
}

/// Interactive prompter on stdin/stdout.
pub struct StdioPrompter;

impl StdioPrompter {
    fn question(field: Field, rules: &FieldRules) -> String {
        match field {
            Field::DatabaseName => "Database name (letters, digits, underscore)".to_string(),
            Field::Charset => format!(
                "Character set [{}] (default {})",
                rules.charsets.join("/"),
                rules.default_charset
            ),
            Field::DatabaseUser => format!(
                "Database username (min {} characters)",
                rules.min_user_length
            ),
            Field::DatabasePassword => format!(
                "Database password (min {} characters)",
                rules.min_password_length
            ),
            Field::Domain => "Domain name (e.g. shop.example.com)".to_string(),
        }
    }
}

impl Prompter for StdioPrompter {
    fn ask(&mut self, field: Field, rules: &FieldRules) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}: ", Self::question(field, rules))?;
        stdout.flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn reject(&mut self, _field: Field, error: &ValidationError) {
        println!("❌ {}", error);
    }
}

/// Prompter that replays queued answers.
///
/// Each field has its own queue. When a queue runs dry the fallback prompter
/// is asked; with no fallback, input counts as closed. Rejections are kept
/// for inspection.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: HashMap<Field, VecDeque<String>>,
    fallback: Option<Box<dyn Prompter>>,
    rejections: Vec<(Field, ValidationError)>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for a field.
    pub fn answer(mut self, field: Field, value: impl Into<String>) -> Self {
        self.answers.entry(field).or_default().push_back(value.into());
        self
    }

    /// Ask this prompter once the queue for a field is empty.
    pub fn with_fallback(mut self, fallback: Box<dyn Prompter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Answers rejected so far.
    pub fn rejections(&self) -> &[(Field, ValidationError)] {
        &self.rejections
    }

    /// Answers not yet consumed for a field.
    pub fn remaining(&self, field: Field) -> usize {
        self.answers.get(&field).map_or(0, VecDeque::len)
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, field: Field, rules: &FieldRules) -> io::Result<Option<String>> {
        if let Some(answer) = self.answers.get_mut(&field).and_then(VecDeque::pop_front) {
            return Ok(Some(answer));
        }
        match self.fallback.as_mut() {
            Some(fallback) => fallback.ask(field, rules),
            None => Ok(None),
        }
    }

    fn reject(&mut self, field: Field, error: &ValidationError) {
        self.rejections.push((field, error.clone()));
        if let Some(fallback) = self.fallback.as_mut() {
            fallback.reject(field, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_reprompts_until_valid() {
        let rules = FieldRules::default();
        let mut prompter = ScriptedPrompter::new()
            .answer(Field::Domain, "example")
            .answer(Field::Domain, "shop..com")
            .answer(Field::Domain, "shop.example.com");

        let value = collect(&mut prompter, Field::Domain, &rules, None).unwrap();

        assert_eq!(value, "shop.example.com");
        assert_eq!(prompter.rejections().len(), 2);
        assert_eq!(prompter.remaining(Field::Domain), 0);
    }

    #[test]
    fn test_collect_bounded_attempts() {
        let rules = FieldRules::default();
        let mut prompter = ScriptedPrompter::new()
            .answer(Field::DatabaseUser, "ab")
            .answer(Field::DatabaseUser, "x")
            .answer(Field::DatabaseUser, "shop_user");

        let err = collect(&mut prompter, Field::DatabaseUser, &rules, Some(2)).unwrap_err();

        assert!(matches!(err, CoreError::InputExhausted { attempts: 2, .. }));
        assert_eq!(prompter.remaining(Field::DatabaseUser), 1);
    }

    #[test]
    fn test_collect_closed_input() {
        let rules = FieldRules::default();
        let mut prompter = ScriptedPrompter::new().answer(Field::DatabaseName, "bad-name");

        let err = collect(&mut prompter, Field::DatabaseName, &rules, None).unwrap_err();
        assert!(matches!(err, CoreError::InputClosed(_)));
    }

    #[test]
    fn test_empty_charset_selects_default() {
        let rules = FieldRules::default();
        let mut prompter = ScriptedPrompter::new().answer(Field::Charset, "");

        let value = collect(&mut prompter, Field::Charset, &rules, Some(1)).unwrap();
        assert_eq!(value, "utf8mb4");
    }

    #[test]
    fn test_fallback_is_used_when_queue_empty() {
        let rules = FieldRules::default();
        let fallback = ScriptedPrompter::new().answer(Field::DatabaseName, "from_fallback");
        let mut prompter = ScriptedPrompter::new().with_fallback(Box::new(fallback));

        let value = collect(&mut prompter, Field::DatabaseName, &rules, None).unwrap();
        assert_eq!(value, "from_fallback");
    }
}
