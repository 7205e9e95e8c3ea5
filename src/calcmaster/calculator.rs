//! # Calculator State Machine
//!
//! [`Calculator`] owns the edit buffer, the memory register, the error flag and
//! the mode, and turns keypad commands into buffer transitions. It is the single
//! authoritative state object of a session; presentation code reads it through
//! [`Calculator::snapshot`] and drives it through the command methods.
//!
//! ## States
//!
//! | State | Condition | Display |
//! |-------|-----------|---------|
//! | `Idle` | buffer empty, no error | `0` |
//! | `Editing` | buffer non-empty, no error | the buffer |
//! | `Errored` | last evaluation failed | `Error` (buffer kept for editing) |
//!
//! An error is only left through [`Calculator::clear`], [`Calculator::append`],
//! [`Calculator::delete_last`] or a buffer replacement such as a memory recall.
//!
//! ## Persistence
//!
//! Every command runs synchronously and completes before it returns. When the
//! calculator was built with [`Calculator::restore`] each command also hands
//! the keys it changed to a [`Persister`], which writes them in the background.
//!
//! ```rust
//! use calcmaster::{CalcState, Calculator};
//!
//! let mut calc = Calculator::new();
//! calc.append("0").unwrap();
//! calc.append("7").unwrap();
//! calc.append("*6").unwrap();
//! assert_eq!(calc.buffer(), "7*6");
//!
//! assert_eq!(calc.evaluate().unwrap(), Some(42.0));
//! assert_eq!(calc.buffer(), "42");
//! assert_eq!(calc.history().len(), 1);
//!
//! calc.append("/0").unwrap();
//! assert!(calc.evaluate().is_err());
//! assert_eq!(calc.state(), CalcState::Errored);
//! assert_eq!(calc.snapshot().readout(), "Error");
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::config::CalcConfig;
use super::evaluator::{evaluate_expression, format_number, CalcError, EvalError};
use super::history::HistoryManager;
use super::parser::{is_accepted_char, ParseError};
use super::persistence::{load_session, parse_stored, Persister};
use super::storage::{keys, JsonFileStore, KeyValueStore};

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Tokens the keypad inserts for its non-digit keys.
pub mod keypad {
    /// The `+/-` key. Multiplies by negative one rather than toggling a sign.
    pub const SIGN_FLIP: &str = "*-1";
    pub const PI: &str = "3.14159";
    pub const E: &str = "2.71828";
    pub const SQUARE: &str = "^2";
    pub const CUBE: &str = "^3";
    pub const RECIPROCAL: &str = "1/";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Standard,
    Scientific,
}

impl Mode {
    pub fn is_scientific(self) -> bool {
        self == Mode::Scientific
    }

    pub fn toggled(self) -> Self {
        match self {
            Mode::Standard => Mode::Scientific,
            Mode::Scientific => Mode::Standard,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Standard => "standard",
            Mode::Scientific => "scientific",
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Standard
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcState {
    Idle,
    Editing,
    Errored,
}

/// Lifetime usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageStats {
    /// Whole minutes accumulated by [`Calculator::track_session_time`].
    pub total_minutes: u64,
    /// Successful evaluations.
    pub total_calculations: u64,
}

impl UsageStats {
    /// `"2 hours 5 minutes"`, or just `"1 minute"` under an hour.
    pub fn format_usage_time(&self) -> String {
        let hours = self.total_minutes / 60;
        let minutes = self.total_minutes % 60;
        if hours > 0 {
            format!("{} {}", plural(hours, "hour"), plural(minutes, "minute"))
        } else {
            plural(minutes, "minute")
        }
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("{} {}", count, unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// The calculator fields that survive a restart, apart from history.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PersistedState {
    pub memory: f64,
    pub mode: Mode,
    pub usage_minutes: u64,
    pub calculations: u64,
}

impl PersistedState {
    /// Storage key and string value for each field.
    pub fn encode(&self) -> Vec<(&'static str, String)> {
        vec![
            (keys::MEMORY, self.memory.to_string()),
            (keys::SCIENTIFIC_MODE, self.mode.is_scientific().to_string()),
            (keys::USAGE_TIME, self.usage_minutes.to_string()),
            (keys::CALCULATIONS, self.calculations.to_string()),
        ]
    }

    /// Rebuild from stored strings. Missing or corrupt fields keep their default.
    pub fn decode<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let memory = match parse_stored::<f64>(keys::MEMORY, lookup(keys::MEMORY).as_deref()) {
            Some(value) if value.is_finite() => value,
            Some(value) => {
                warn!("Ignoring non-finite {}: {}", keys::MEMORY, value);
                0.0
            }
            None => 0.0,
        };

        let mode = match lookup(keys::SCIENTIFIC_MODE).as_deref() {
            Some("true") => Mode::Scientific,
            Some("false") | None => Mode::Standard,
            Some(other) => {
                warn!("Ignoring corrupt {}: {:?}", keys::SCIENTIFIC_MODE, other);
                Mode::Standard
            }
        };

        let usage_minutes =
            parse_stored(keys::USAGE_TIME, lookup(keys::USAGE_TIME).as_deref()).unwrap_or(0);
        let calculations =
            parse_stored(keys::CALCULATIONS, lookup(keys::CALCULATIONS).as_deref()).unwrap_or(0);

        Self {
            memory,
            mode,
            usage_minutes,
            calculations,
        }
    }
}

/// Read-only view handed to presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorSnapshot {
    /// The buffer, or `"0"` when it is empty.
    pub display: String,
    pub buffer: String,
    pub last_result: String,
    pub error: Option<CalcError>,
    pub memory: f64,
    pub mode: Mode,
    pub usage: UsageStats,
    pub state: CalcState,
}

impl CalculatorSnapshot {
    /// What the main readout shows: `"Error"` while the error flag is set.
    pub fn readout(&self) -> &str {
        if self.error.is_some() {
            "Error"
        } else {
            &self.display
        }
    }

    /// Whether the memory indicator is lit.
    pub fn has_memory(&self) -> bool {
        self.memory != 0.0
    }
}

pub struct Calculator {
    buffer: String,
    last_result: String,
    memory: f64,
    mode: Mode,
    error: Option<CalcError>,
    usage: UsageStats,
    /// Start of the not-yet-counted usage interval.
    last_flush_ms: i64,
    last_interaction_ms: i64,
    history: HistoryManager,
    clock: Arc<dyn Clock>,
    persister: Option<Persister>,
}

impl Calculator {
    /// Fresh calculator on the system clock, without persistence.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            buffer: String::new(),
            last_result: "0".to_string(),
            memory: 0.0,
            mode: Mode::Standard,
            error: None,
            usage: UsageStats::default(),
            last_flush_ms: now,
            last_interaction_ms: now,
            history: HistoryManager::default(),
            clock,
            persister: None,
        }
    }

    /// Send every subsequent change to `persister`.
    pub fn with_persister(mut self, persister: Persister) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Load the last session from `store` and keep saving into it.
    ///
    /// Loading is best-effort: anything missing or corrupt starts from its
    /// default. Restored history is pruned with the restored retention window.
    pub async fn restore(
        store: Arc<dyn KeyValueStore>,
        config: &CalcConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = load_session(store.as_ref(), config.default_retention_days).await;

        let mut calc = Self::with_clock(clock);
        calc.apply_persisted(session.state);
        calc.history = HistoryManager::from_entries(session.history, session.retention_days);
        let pruned = calc.history.prune(calc.clock.now_millis());

        calc.persister = Some(Persister::spawn(store, config.save_debounce));
        if pruned > 0 {
            calc.persist(keys::HISTORY);
        }
        calc
    }

    /// Restore from the JSON file named by `config.storage_path`, on the system clock.
    ///
    /// ```rust,no_run
    /// use calcmaster::{CalcConfig, Calculator};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> std::io::Result<()> {
    /// let mut calc = Calculator::open(&CalcConfig::default()).await?;
    /// calc.append("1+1").unwrap();
    /// calc.evaluate().unwrap();
    /// calc.flush().await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open(config: &CalcConfig) -> io::Result<Self> {
        let store = JsonFileStore::open(config.storage_path.clone()).await?;
        Ok(Self::restore(Arc::new(store), config, Arc::new(SystemClock)).await)
    }

    /// Append a keypad token to the buffer and clear the error flag.
    ///
    /// A numeric token replaces a lone `"0"`; anything else is concatenated
    /// (so `.` on `"0"` gives `"0."`). Syntax is not checked here, only the
    /// alphabet: a token with a character no expression can contain is
    /// rejected and the buffer is left untouched.
    pub fn append(&mut self, token: &str) -> Result<(), ParseError> {
        check_alphabet(token, self.buffer.chars().count())?;
        self.touch();
        self.error = None;

        if self.buffer == "0" && is_numeric_token(token) {
            self.buffer = token.to_string();
        } else {
            self.buffer.push_str(token);
        }
        debug!("append {:?} -> buffer {:?}", token, self.buffer);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.touch();
        self.buffer.clear();
        self.error = None;
        debug!("clear");
    }

    /// Drop the last character. Emptying the buffer returns to `Idle`.
    pub fn delete_last(&mut self) {
        self.touch();
        self.error = None;
        self.buffer.pop();
    }

    /// Evaluate the buffer and commit the result.
    ///
    /// Returns `Ok(None)` for an empty buffer. On success the expression goes
    /// to history and the buffer becomes the result, ready for chaining. On
    /// failure the buffer is kept and the error flag is set; while it stays
    /// set, further calls return the held error without doing anything.
    pub fn evaluate(&mut self) -> Result<Option<f64>, CalcError> {
        self.touch();
        if let Some(held) = &self.error {
            return Err(held.clone());
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match evaluate_expression(&self.buffer) {
            Ok(value) => {
                let result = format_number(value);
                let expression = std::mem::replace(&mut self.buffer, result.clone());
                debug!("evaluate {:?} = {}", expression, result);

                let now = self.clock.now_millis();
                self.history.record(expression, result.clone(), self.mode, now);
                self.last_result = result;
                self.usage.total_calculations = self.usage.total_calculations.saturating_add(1);

                self.persist(keys::HISTORY);
                self.persist(keys::CALCULATIONS);
                Ok(Some(value))
            }
            Err(e) => {
                debug!("evaluate {:?} failed: {}", self.buffer, e);
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    pub fn toggle_mode(&mut self) -> Mode {
        self.touch();
        self.mode = self.mode.toggled();
        debug!("mode -> {}", self.mode);
        self.persist(keys::SCIENTIFIC_MODE);
        self.mode
    }

    pub fn memory_clear(&mut self) {
        self.touch();
        self.memory = 0.0;
        self.persist(keys::MEMORY);
    }

    /// Add the buffer's value to memory without committing it.
    pub fn memory_add(&mut self) -> Result<(), CalcError> {
        self.accumulate_memory(1.0)
    }

    /// Subtract the buffer's value from memory without committing it.
    pub fn memory_subtract(&mut self) -> Result<(), CalcError> {
        self.accumulate_memory(-1.0)
    }

    /// Replace the buffer with the memory value. Does nothing while memory is `0`.
    pub fn memory_recall(&mut self) -> bool {
        self.touch();
        if self.memory == 0.0 {
            return false;
        }
        self.buffer = format_number(self.memory);
        self.error = None;
        true
    }

    /// Change the history retention window, pruning right away.
    pub fn set_retention(&mut self, days: u32) -> usize {
        self.touch();
        let removed = self.history.set_retention(days, self.clock.now_millis());
        self.persist(keys::RETENTION_DAYS);
        if removed > 0 {
            self.persist(keys::HISTORY);
        }
        removed
    }

    pub fn clear_history(&mut self) {
        self.touch();
        self.history.clear_all();
        self.persist(keys::HISTORY);
    }

    /// Load a previous result, e.g. one picked from history, into the buffer.
    pub fn use_result(&mut self, result: &str) -> Result<(), ParseError> {
        check_alphabet(result, 0)?;
        self.touch();
        self.buffer = result.to_string();
        self.error = None;
        Ok(())
    }

    /// Add the whole minutes elapsed since the last counted instant.
    ///
    /// The counted instant only moves by whole minutes, so the remainder
    /// carries into the next call. Returns the minutes added.
    pub fn track_session_time(&mut self, now: i64) -> u64 {
        self.last_interaction_ms = now;
        let elapsed = now.saturating_sub(self.last_flush_ms);
        if elapsed < MILLIS_PER_MINUTE {
            return 0;
        }

        let minutes = elapsed / MILLIS_PER_MINUTE;
        self.last_flush_ms += minutes * MILLIS_PER_MINUTE;
        self.usage.total_minutes = self.usage.total_minutes.saturating_add(minutes as u64);
        self.persist(keys::USAGE_TIME);
        minutes as u64
    }

    /// Wait until every scheduled save has been handed to the store.
    pub async fn flush(&self) {
        if let Some(persister) = &self.persister {
            persister.flush().await;
        }
    }

    pub fn state(&self) -> CalcState {
        if self.error.is_some() {
            CalcState::Errored
        } else if self.buffer.is_empty() {
            CalcState::Idle
        } else {
            CalcState::Editing
        }
    }

    pub fn snapshot(&self) -> CalculatorSnapshot {
        CalculatorSnapshot {
            display: self.display().to_string(),
            buffer: self.buffer.clone(),
            last_result: self.last_result.clone(),
            error: self.error.clone(),
            memory: self.memory,
            mode: self.mode,
            usage: self.usage,
            state: self.state(),
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn display(&self) -> &str {
        if self.buffer.is_empty() {
            "0"
        } else {
            &self.buffer
        }
    }

    pub fn last_result(&self) -> &str {
        &self.last_result
    }

    pub fn error(&self) -> Option<&CalcError> {
        self.error.as_ref()
    }

    pub fn memory(&self) -> f64 {
        self.memory
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn usage(&self) -> UsageStats {
        self.usage
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn last_interaction_ms(&self) -> i64 {
        self.last_interaction_ms
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            memory: self.memory,
            mode: self.mode,
            usage_minutes: self.usage.total_minutes,
            calculations: self.usage.total_calculations,
        }
    }

    fn apply_persisted(&mut self, state: PersistedState) {
        self.memory = state.memory;
        self.mode = state.mode;
        self.usage = UsageStats {
            total_minutes: state.usage_minutes,
            total_calculations: state.calculations,
        };
    }

    fn accumulate_memory(&mut self, sign: f64) -> Result<(), CalcError> {
        self.touch();
        if self.buffer.is_empty() {
            return Ok(());
        }

        let outcome = evaluate_expression(&self.buffer).and_then(|value| {
            let updated = self.memory + sign * value;
            if updated.is_finite() {
                Ok(updated)
            } else {
                Err(CalcError::Eval(EvalError::InvalidResult))
            }
        });

        match outcome {
            Ok(updated) => {
                self.memory = updated;
                self.persist(keys::MEMORY);
                Ok(())
            }
            Err(e) => {
                debug!("memory update from {:?} failed: {}", self.buffer, e);
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn touch(&mut self) {
        self.last_interaction_ms = self.clock.now_millis();
    }

    fn persist(&self, key: &'static str) {
        let persister = match &self.persister {
            Some(persister) => persister,
            None => return,
        };

        let value = match key {
            keys::HISTORY => match self.history.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize history: {}", e);
                    return;
                }
            },
            keys::RETENTION_DAYS => self.history.retention_days().to_string(),
            _ => match self
                .persisted_state()
                .encode()
                .into_iter()
                .find(|(field, _)| *field == key)
            {
                Some((_, value)) => value,
                None => return,
            },
        };
        persister.schedule(key, value);
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Calculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calculator")
            .field("buffer", &self.buffer)
            .field("last_result", &self.last_result)
            .field("memory", &self.memory)
            .field("mode", &self.mode)
            .field("error", &self.error)
            .field("usage", &self.usage)
            .field("history", &self.history.len())
            .field("persisted", &self.persister.is_some())
            .finish()
    }
}

fn check_alphabet(token: &str, offset: usize) -> Result<(), ParseError> {
    match token.chars().enumerate().find(|(_, c)| !is_accepted_char(*c)) {
        Some((index, ch)) => Err(ParseError::UnexpectedCharacter {
            ch,
            position: offset + index,
        }),
        None => Ok(()),
    }
}

/// Digits with optional dots, at least one digit. `"."` alone is not numeric.
fn is_numeric_token(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_token() {
        assert!(is_numeric_token("7"));
        assert!(is_numeric_token(keypad::PI));
        assert!(!is_numeric_token("."));
        assert!(!is_numeric_token(""));
        assert!(!is_numeric_token(keypad::SIGN_FLIP));
        assert!(!is_numeric_token("sin("));
    }

    #[test]
    fn test_format_usage_time() {
        let usage = |total_minutes| UsageStats {
            total_minutes,
            total_calculations: 0,
        };
        assert_eq!(usage(0).format_usage_time(), "0 minutes");
        assert_eq!(usage(1).format_usage_time(), "1 minute");
        assert_eq!(usage(61).format_usage_time(), "1 hour 1 minute");
        assert_eq!(usage(125).format_usage_time(), "2 hours 5 minutes");
    }

    #[test]
    fn test_persisted_state_encoding() {
        let state = PersistedState {
            memory: 2.5,
            mode: Mode::Scientific,
            usage_minutes: 7,
            calculations: 3,
        };
        let encoded = state.encode();
        assert!(encoded.contains(&(keys::MEMORY, "2.5".to_string())));
        assert!(encoded.contains(&(keys::SCIENTIFIC_MODE, "true".to_string())));

        let decoded = PersistedState::decode(|key| {
            encoded
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
        });
        assert_eq!(decoded, state);
    }
}
