//! # Folio Core
//!
//! The retrieval-augmented generation pipeline behind Folio, independent of
//! any transport, database driver or model provider:
//!
//! | Module | Role |
//! |--------|------|
//! | [`models`] | Records: documents, chunks, vectors, turns, answers |
//! | [`chunk`] | Overlapping character windows |
//! | [`embedding`] | [`Embedder`](embedding::Embedder) capability, hash embedder, vector helpers |
//! | [`store`] | [`VectorStore`](store::VectorStore) trait, in-memory/snapshot backend, [`IndexHandle`](store::IndexHandle) |
//! | [`index`] | Batch embedding and insertion |
//! | [`retrieve`] | Top-k similarity retrieval |
//! | [`generation`] | [`LanguageModel`](generation::LanguageModel) capability and prompts |
//! | [`conversation`] | Multi-turn engine with memory |
//! | [`normalize`] | Answer translation into the question's language |
//! | [`bounded`] | Timeout and cancellation for external calls |
//! | [`error`] | [`RagError`](error::RagError) |
//!
//! Providers (OpenAI, Ollama, SQLite storage, PDF extraction) live in the
//! `folio` crate and plug in through the capability traits.

pub mod bounded;
pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod normalize;
pub mod retrieve;
pub mod store;

pub use error::RagError;
