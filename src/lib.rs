//! # CalcMaster
//!
//! CalcMaster is the engine behind a personal scientific calculator: everything that has real
//! logic, with none of the screens around it.
//!
//! The crate provides:
//!
//! * **Expression Parsing**: [`parser::parse`] turns a keypad buffer such as `2sqrt(16)^2!` into
//!   an [`parser::ExprNode`] tree, with factorial, power, percent and implicit multiplication
//! * **Evaluation**: [`evaluator::evaluate`] computes a double and rejects division by zero,
//!   out-of-domain arguments and non-finite results with a typed [`EvalError`]
//! * **Keypad State Machine**: [`Calculator`] owns the edit buffer, memory register, error flag
//!   and standard/scientific mode
//! * **Retained History**: [`HistoryManager`] keeps committed calculations newest first and
//!   prunes them by a retention window of 1, 7, 30 days or forever
//! * **Persistence**: the [`storage::KeyValueStore`] port with in-memory and JSON-file adapters,
//!   fed by a debounced background [`persistence::Persister`]
//!
//! ## Evaluating Expressions
//!
//! ```rust
//! use calcmaster::evaluator::evaluate_expression;
//!
//! assert_eq!(evaluate_expression("2+3*4").unwrap(), 14.0);
//! assert_eq!(evaluate_expression("2^3^2").unwrap(), 512.0);
//! assert_eq!(evaluate_expression("5!").unwrap(), 120.0);
//! assert!(evaluate_expression("sqrt(-4)").is_err());
//! ```
//!
//! ## Driving the Calculator
//!
//! ```rust
//! use calcmaster::{Calculator, Mode};
//! use calcmaster::calculator::keypad;
//!
//! let mut calc = Calculator::new();
//! calc.toggle_mode();
//! assert_eq!(calc.mode(), Mode::Scientific);
//!
//! calc.append("sqrt(").unwrap();
//! calc.append("16").unwrap();
//! calc.append(")").unwrap();
//! calc.append(keypad::SIGN_FLIP).unwrap();
//! assert_eq!(calc.evaluate().unwrap(), Some(-4.0));
//!
//! calc.memory_add().unwrap();
//! assert_eq!(calc.memory(), -4.0);
//! assert_eq!(calc.history().entries()[0].mode, Mode::Scientific);
//! ```
//!
//! ## Surviving Restarts
//!
//! ```rust
//! use std::sync::Arc;
//! use calcmaster::{CalcConfig, Calculator};
//! use calcmaster::clock::SystemClock;
//! use calcmaster::storage::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! calcmaster::init_logger();
//!
//! let store = MemoryStore::new();
//! let config = CalcConfig::default();
//!
//! let mut calc = Calculator::restore(Arc::new(store.clone()), &config, Arc::new(SystemClock)).await;
//! calc.append("6*7").unwrap();
//! calc.evaluate().unwrap();
//! calc.flush().await;
//!
//! let restored = Calculator::restore(Arc::new(store), &config, Arc::new(SystemClock)).await;
//! assert_eq!(restored.usage().total_calculations, 1);
//! assert_eq!(restored.history().entries()[0].result, "42");
//! # }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Hosts that want `RUST_LOG` driven diagnostics call this at startup; everything else in the
/// crate only talks to the `log` facade.
///
/// ```rust
/// calcmaster::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `calcmaster` module.
pub mod calcmaster;

// Re-exporting key items for easier external access.
pub use calcmaster::calculator;
pub use calcmaster::calculator::{
    CalcState, Calculator, CalculatorSnapshot, Mode, PersistedState, UsageStats,
};
pub use calcmaster::clock;
pub use calcmaster::config::CalcConfig;
pub use calcmaster::evaluator;
pub use calcmaster::evaluator::{CalcError, EvalError};
pub use calcmaster::history;
pub use calcmaster::history::{HistoryEntry, HistoryGroup, HistoryManager};
pub use calcmaster::parser;
pub use calcmaster::parser::ParseError;
pub use calcmaster::persistence;
pub use calcmaster::persistence::Persister;
pub use calcmaster::storage;
pub use calcmaster::storage::{JsonFileStore, KeyValueStore, MemoryStore};
