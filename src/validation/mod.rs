//! Validation module - transaction model, variant payloads, and the reject taxonomy

mod reject;
mod transaction;

pub use reject::*;
pub use transaction::*;
