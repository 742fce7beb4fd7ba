//! Domain records, wire views and request payloads.

pub mod models;
pub mod requests;
