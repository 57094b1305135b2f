//! # Lectern
//!
//! A grade-aware tutoring backend. Textbook documents are ingested into a
//! searchable passage index; student questions are answered from the
//! passages that match their grade, streamed fragment by fragment while
//! the exchange is recorded durably.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌───────────────┐
//! │  Upload  │──▶│ Ingestion         │──▶│ Passage index  │
//! │ (pdf/txt)│   │ extract→chunk→    │   │ SQLite + vecs  │
//! └──────────┘   │ embed→upsert      │   └──────┬────────┘
//!                └──────────────────┘          │
//!                                              ▼
//!                ┌──────────────────┐   ┌───────────────┐
//! question+grade │ Retrieval         │──▶│ Answer stream  │──▶ conversation
//! ──────────────▶│ (grade filter +   │   │ (generation +  │    messages
//!                │  widening)        │   │  persistence)  │
//!                └──────────────────┘   └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lectern init                                          # create database
//! lectern ingest ch1.pdf --grade 9 --subject Physics --chapter Motion
//! lectern ask "What is inertia?" --grade 9              # streamed answer
//! lectern worker                                        # drain queued jobs
//! lectern serve                                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Overlapping text chunking |
//! | [`extract`] | Document text extraction |
//! | [`embedding`] | Embedding capability client |
//! | [`index`] | Vector index adapter |
//! | [`ingestion`] | Ingestion job state machine |
//! | [`worker`] | Background job worker |
//! | [`retrieval`] | Grade-filtered retrieval with fallback |
//! | [`generation`] | Generation capability client |
//! | [`conversations`] | Conversation persistence |
//! | [`answer`] | Streaming and blocking answers |
//! | [`server`] | HTTP boundary |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunker;
pub mod config;
pub mod conversations;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingestion;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod worker;
