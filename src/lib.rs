//! # Produce Scout
//!
//! Watches a drop folder for a produce photo, asks a vision model what it
//! shows, and resolves the answer against a picklist of known products
//! (name, PLU code, price).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  bytes  ┌───────────┐  answer  ┌─────────┐ candidates ┌──────────┐
//! │ Watcher  │────────▶│  Gateway  │─────────▶│ Matcher │───────────▶│ Resolver │
//! │ (poll)   │         │ (model +  │◀─────────┴─────────┘  >1: refine│          │
//! └──────────┘         │  Session) │◀────────────────────────────────┤          │
//!                      └───────────┘                                 └────┬─────┘
//!                                                                         ▼
//!                                                                      Report
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=...
//! scout ./drop                 # wait for one photo in ./drop and resolve it
//! scout --loop ./drop          # keep resolving until Ctrl-C
//! scout classify apple.png     # resolve an existing file
//! scout serve                  # POST /classify over HTTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Diagnostic logging setup |
//! | [`models`] | Product and answer types |
//! | [`picklist`] | Product catalog loading |
//! | [`watcher`] | Polling directory watcher |
//! | [`vision`] | Remote vision model backends |
//! | [`gateway`] | Classification gateway and Session |
//! | [`matcher`] | Picklist matching and refinement prompts |
//! | [`resolver`] | Pipeline orchestration and reports |
//! | [`progress`] | Stage reporting |
//! | [`server`] | HTTP front end |

pub mod config;
pub mod gateway;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod picklist;
pub mod progress;
pub mod resolver;
pub mod server;
pub mod vision;
pub mod watcher;
