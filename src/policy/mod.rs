//! License policy: duration arithmetic and redemption rules.

pub mod duration;
pub mod redemption;
