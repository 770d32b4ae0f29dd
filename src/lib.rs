//! # Pulse
//!
//! An activity ingestion and search engine.
//!
//! Pulse streams activities (feed items, releases, issues, forum posts,
//! status updates, page changes) from configured sources, enriches each one
//! with a summary and an embedding, stores it, and serves similarity-ranked
//! or temporal search over the stored corpus.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Sources    │──▶│ Bounded queue │──▶│ Worker pool  │──▶│  Store   │
//! │ RSS/GH/HN…  │   │ activity+err  │   │ summ.+embed  │   │ SQLite   │
//! └─────────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!        ▲                                                      │
//!        │ add / remove / restore                      search   │
//!   ┌────┴─────┐                                                ▼
//!   │ Registry │◀───────────────────────────────────────── CLI (pulse)
//!   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pulse init                          # create database
//! pulse run                           # ingest until Ctrl-C
//! pulse search "rust async runtime"   # ranked search
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Activity variants, summaries, search requests |
//! | [`source_type`] | Closed source-type enumeration and payload decoding |
//! | [`executor`] | Bounded fan-out executor and batch classification |
//! | [`source`] | Source trait, stream sink, adapter factory |
//! | [`sources`] | Concrete source adapters |
//! | [`registry`] | Source lifecycle and ingestion worker pool |
//! | [`store`] | Activity and source repositories, search ranking |
//! | [`summarize`] | Summarizer abstraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`error`] | Error taxonomy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod registry;
pub mod source;
pub mod source_type;
pub mod sources;
pub mod store;
pub mod summarize;
