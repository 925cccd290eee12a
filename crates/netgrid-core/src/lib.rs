pub mod filter;
pub mod types;

pub use filter::FilterClauses;
pub use types::*;
