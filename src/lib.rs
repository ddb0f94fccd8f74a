//! # Doc Relay
//!
//! Keeps a managed assistant search index in step with an external file
//! store, and turns the assistant's cited answers into plain text plus a
//! list of source documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  list   ┌──────────┐ changes ┌──────────┐ upload/delete ┌──────────────┐
//! │ File store  │────────▶│ detect   │────────▶│  sync    │──────────────▶│ Vector store │
//! │ Box / disk  │         └────┬─────┘         └────┬─────┘               └──────┬───────┘
//! └─────────────┘              │   record store     │                            │ retrieval
//!                              └──────▶ JSON/SQLite ◀┘                           ▼
//!                                                              ┌──────────┐  ┌──────────┐
//!                                     HTTP / CLI ─────────────▶│ sessions │─▶│assistant │
//!                                                              └────┬─────┘  └──────────┘
//!                                                                   ▼
//!                                                              citations
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! relay init                # create the record store
//! relay detect              # preview what would be uploaded
//! relay sync                # upload new and modified documents
//! relay serve               # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`records`] | Record Store backends (JSON, SQLite, memory) |
//! | [`detect`] | Change Detector |
//! | [`sync`] | Index Synchronizer |
//! | [`ingest`] | One full synchronization pass |
//! | [`citations`] | Citation Resolver |
//! | [`session`] | Session Registry |
//! | [`traits`] | Collaborator traits and their construction from config |
//! | [`connector_box`] | Box folder file store |
//! | [`connector_fs`] | Local folder file store |
//! | [`openai`] | OpenAI REST client |
//! | [`vector_store`] | OpenAI vector store as the search index |
//! | [`assistant`] | OpenAI Assistants adapter |
//! | [`server`] | HTTP API |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Record store preparation |

pub mod assistant;
pub mod citations;
pub mod config;
pub mod connector_box;
pub mod connector_fs;
pub mod db;
pub mod detect;
pub mod error;
pub mod filter;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod openai;
pub mod progress;
pub mod records;
pub mod server;
pub mod session;
pub mod status;
pub mod sync;
pub mod traits;
pub mod vector_store;
