//! # doc-triager
//!
//! Sorts documents into durable (`evergreen`), time-sensitive (`temporal`)
//! and indeterminate (`unknown`) trees. Each file is fingerprinted, its
//! text extracted and bounded, a language model classifies it, and the
//! result is gated on confidence before the file is moved and an audit
//! record written.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌───────────┐   ┌──────────┐
//! │ Scanner  │──▶│ Gate → Extract →  │──▶│ LLM       │──▶│ Mover +  │
//! │ (walk)   │   │ Truncate → Prompt │   │ api / cli │   │ SQLite   │
//! └──────────┘   └───────────────────┘   └───────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and CLI overrides |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`store`] | Triage record persistence |
//! | [`checksum`] | Content fingerprints and the dedup gate |
//! | [`scanner`] | Candidate file discovery |
//! | [`extract`] | Text extraction |
//! | [`truncate`] | Head/tail text truncation |
//! | [`prompt`] | Prompt templates |
//! | [`llm`] | Model backends (HTTP API, claude, codex) |
//! | [`classify`] | Summarization, response parsing, confidence gate |
//! | [`mover`] | Collision-safe relocation |
//! | [`pipeline`] | Per-file orchestration and batch runs |

pub mod checksum;
pub mod classify;
pub mod config;
pub mod db;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod mover;
pub mod pipeline;
pub mod prompt;
pub mod scanner;
pub mod store;
pub mod truncate;
