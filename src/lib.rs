//! # Folio
//!
//! Ask questions about a folder of PDF documents.
//!
//! Folio extracts the text of every PDF in a source directory, splits it
//! into overlapping chunks, embeds and indexes them locally, and answers
//! questions in a multi-turn conversation grounded in the best-matching
//! passages, citing the documents they came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker  │──▶│ Indexer  │──▶│ Vector index │
//! │ PDF text │   │ overlap  │   │ embed    │   │ SQLite / mem │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬───────┘
//!                                                     │
//!                        ┌────────────────────────────┤
//!                        ▼                            ▼
//!                  ┌───────────┐              ┌──────────────┐
//!                  │ Retriever │◀─────────────│ Conversation │──▶ Normalizer
//!                  └───────────┘              └──────┬───────┘
//!                                                    │
//!                                       ┌────────────┴───────┐
//!                                       ▼                    ▼
//!                                  ┌─────────┐         ┌──────────┐
//!                                  │   CLI   │         │   HTTP   │
//!                                  └─────────┘         └──────────┘
//! ```
//!
//! The pipeline stages and their traits live in `folio-core`; this crate
//! provides configuration, PDF extraction, concrete providers, the SQLite
//! backend, and the two user surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`loader`] | Source directory scan and PDF loading |
//! | [`extract`] | PDF text extraction |
//! | [`language`] | Language detection |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat model providers |
//! | [`sqlite_store`] | SQLite vector backend |
//! | [`pipeline`] | Idempotent index build |
//! | [`session`] | Shared services and conversation sessions |
//! | [`server`] | HTTP chat surface |

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod language;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod session;
pub mod sources;
pub mod sqlite_store;
