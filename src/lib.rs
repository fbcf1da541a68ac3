//! # libris
//!
//! Retrieval-augmented question answering over a local library of PDF,
//! EPUB and plain-text documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ books/     │──▶│ Extract      │──▶│  SQLite   │
//! │ texts/     │   │ Chunk+Embed  │   │  vectors  │
//! └────────────┘   └──────────────┘   └────┬─────┘
//!                                          │
//!                     Retrieve ◀───────────┘
//!                        │
//!                        ▼
//!               Prompt → Generator → answer + sources
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! libris ingest                 # index books/, texts/, data/
//! libris ask "How do I price a retainer?"
//! libris chat                   # interactive loop
//! libris serve                  # HTTP on 127.0.0.1:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Settings from defaults, TOML and environment |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / EPUB / text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index (SQLite, in-memory) |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Nearest-neighbour retrieval and attribution |
//! | [`generate`] | Offline and remote answer generators |
//! | [`answer`] | Prompt building and answer composition |
//! | [`server`] | HTTP endpoint |

pub mod answer;
pub mod app;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
mod http;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod retrieve;
pub mod server;
pub mod store;

pub use app::App;
