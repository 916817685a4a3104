//! # Requirement Harness
//!
//! Retrieval-backed requirement analysis. A new requirement is matched
//! against a catalog of historical projects, the documents of the closest
//! matches are assembled into context, and a generation pipeline drafts
//! impacted modules, an effort estimate, a design document and a backlog.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ requirement │──▶│ HybridSearch │──▶│  Assembler   │
//! └─────────────┘   │ vector+terms │   │ docx / xlsx  │
//!                   └──────┬───────┘   └──────┬───────┘
//!                          │                  ▼
//!                   ┌──────┴──────┐    ┌──────────────┐   ┌────────┐
//!                   │ VectorIndex │    │  Generator   │──▶│ repair │
//!                   │   SQLite    │    │ (chat API)   │   │ parse  │
//!                   └─────────────┘    └──────────────┘   └────────┘
//! ```
//!
//! The [`pipeline`] engine drives each run through these stages, owning the
//! run state and recording every transition.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Candidate and project data types |
//! | [`error`] | Error taxonomy |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index trait and in-memory implementation |
//! | [`sqlite_index`] | SQLite-backed vector index |
//! | [`lexical`] | Keyword extraction and term-overlap scoring |
//! | [`search`] | Hybrid retrieval engine |
//! | [`extract`] | Structural OOXML (docx/xlsx) extraction |
//! | [`documents`] | Document store, parsing and context projection |
//! | [`repair`] | Tolerant JSON parsing |
//! | [`generation`] | Text generation backends |
//! | [`pipeline`] | Run state machine and standard steps |
//! | [`catalog`] | Catalog ingestion |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`stats`] | Index statistics |

pub mod catalog;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod repair;
pub mod search;
pub mod sqlite_index;
pub mod stats;
