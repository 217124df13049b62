//! # cmdex
//!
//! Hybrid semantic search and index synchronization for versioned command
//! documentation.
//!
//! A relational store holds structured documentation for two generations
//! of a toolkit (v3 and v4): commands, parameters, examples, long-form
//! documentation sections and cross-version equivalence mappings. cmdex
//! keeps a vector/keyword index in step with that store and answers hybrid
//! (dense + keyword) queries against it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ SourceStore │──▶│   Synchronizer   │──▶│ IndexClient  │
//! │   SQLite    │   │ units+chunk+embed│   │ Qdrant / mem │
//! └─────────────┘   └────────┬─────────┘   └──────┬───────┘
//!                            │ ledger             │
//!                            ▼                    ▼
//!                      ┌──────────┐        ┌─────────────┐
//!                      │  SQLite  │        │ QueryEngine │
//!                      └──────────┘        └──────┬──────┘
//!                                       ┌─────────┴────────┐
//!                                       ▼                  ▼
//!                                  ┌────────┐         ┌────────┐
//!                                  │  CLI   │         │  HTTP  │
//!                                  └────────┘         └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cmdex init                          # create database
//! cmdex sync                          # bring the index in line with the store
//! cmdex search "defer button" --version 3
//! cmdex serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Read access to the relational store |
//! | [`units`] | Source records → indexable units |
//! | [`chunk`] | Documentation chunking |
//! | [`sparse`] | Keyword term weighting |
//! | [`fingerprint`] | Content hashing |
//! | [`embedding`] | Embedding service clients |
//! | [`index`] | Vector/keyword index clients |
//! | [`ledger`] | Per-unit sync state |
//! | [`mapper`] | v3 ↔ v4 command equivalence |
//! | [`sync`] | Index synchronization |
//! | [`query`] | Hybrid query engine |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod ledger;
pub mod mapper;
pub mod migrate;
pub mod models;
pub mod query;
pub mod retry;
pub mod server;
pub mod source;
pub mod sparse;
pub mod stats;
pub mod sync;
pub mod units;

pub use error::{CmdexError, Result};
