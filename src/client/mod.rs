//! Outbound clients.

pub mod identity;
