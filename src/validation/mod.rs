//! Transaction types and signature authenticity

mod transaction;

pub use transaction::*;
