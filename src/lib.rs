// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

mod macros;

pub mod collector;
pub mod config;
pub mod etw;
pub mod events;
pub mod output;
pub mod scanner;
