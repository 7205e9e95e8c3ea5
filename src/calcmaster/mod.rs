// src/calcmaster/mod.rs

pub mod calculator;
pub mod clock;
pub mod config;
pub mod evaluator;
pub mod history;
pub mod parser;
pub mod persistence;
pub mod storage;

// Let's explicitly export Calculator so we don't have to access it via calcmaster::calculator::Calculator
// and instead as calcmaster::Calculator
pub use calculator::Calculator;
pub use history::HistoryManager;
