#![deny(unsafe_code)]

//! Session-level building blocks for a hub server: the method registry,
//! typed sink channels handed to hub methods, and the ingest side of
//! client-to-server streaming.
//!
//! The per-connection driver lives in `hubbub-stream`; everything here is
//! transport-agnostic and owned by that driver task.

mod element;
pub use element::*;

mod errors;
pub use errors::*;

mod hub;
pub use hub::*;

mod sink;
pub use sink::*;

mod upstream;
pub use upstream::*;
