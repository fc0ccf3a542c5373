pub mod adapter;
pub mod behavior;
pub mod config;
pub mod detect;
pub mod distribute;
pub mod error;
pub mod extract;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod reporter;
pub mod solver;
pub mod strategy;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use adapter::AdaptedStrategy;
pub use config::GaleraConfig;
pub use distribute::Distributor;
pub use error::{AppError, ErrorKind};
pub use models::{ExtractionRecord, ScrapeResult};
pub use orchestrator::Orchestrator;
pub use pool::IdentityPool;
pub use strategy::{RenderedFetcher, StaticFetcher};
pub use traits::{FetchStrategy, PlatformAdapter, ResultStore};
