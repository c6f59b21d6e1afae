pub mod config;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod ledger;
pub mod pipeline;
pub mod record;

pub use error::{EngineError, FetchCause, Result};
pub use record::Record;
