//! # meshbridge-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Map **HTTP requests onto the envelope API**: the verb selects the
//!   command (`GET`→get, `PUT`→set, `POST`→create, `DELETE`→delete), the URL
//!   segments form the path and the JSON body is the data.
//! - Serve **WebSocket sessions** on `/ws`: a snapshot on connect, path
//!   changes pushed as they happen, one response per inbound envelope.
//! - Expose `/health` for liveness probes.
//!
//! ## Dependency rule
//! Depends on `meshbridge-app` (for the API and the session protocol) and
//! `meshbridge-domain` (for envelope types). Never leaks axum types into the
//! core.

pub mod api;
pub mod error;
pub mod router;
pub mod state;
pub mod ws;
