//! Core library for zotero-mcp
//!
//! This crate implements the **Functional Core** of the zotero-mcp bridge,
//! following the Functional Core - Imperative Shell architectural pattern.
//!
//! - **`zotero_mcp_core`** (this crate): pure functions with zero I/O —
//!   error classification, retry pacing, pagination and identifier parsing,
//!   response transformation, and the upload protocol state machine.
//! - **`zotero-mcp`**: the imperative shell — HTTP transport, the resilient
//!   request executor and its read cache, the upload orchestrator, the CLI,
//!   and the MCP server.
//!
//! Everything here is deterministic and testable with fixture data: same
//! input, same output, no mocking required. Functions that depend on the
//! current time take it as an argument.
//!
//! # Module Organization
//!
//! - [`error`]: the closed error taxonomy and HTTP outcome classification
//! - [`backoff`]: retry ceiling and exponential pacing
//! - [`pagination`]: `Total-Results` / `Link` header parsing
//! - [`items`]: item, collection, and attachment transformations
//! - [`search`]: DOI / arXiv identifier handling and sort keys
//! - [`upload`]: the attachment upload state machine and its helpers
//! - [`events`]: structured, correlation-tagged client events

pub mod backoff;
pub mod error;
pub mod events;
pub mod items;
pub mod pagination;
pub mod search;
pub mod upload;
