pub mod controller;
pub mod filter;
pub mod frontier;
pub mod links;
pub mod request;
pub mod run;
pub mod scheduler;
pub mod session;

// Re-export common types
pub use controller::{CrawlSummary, CrawlerController};
pub use filter::RunScopedFilter;
pub use frontier::Frontier;
pub use request::{CrawlRequest, Page};
pub use run::{expand_seed, propagate, tag_request, RunContext, RunId, UntaggedPage};
pub use scheduler::Scheduler;
pub use session::SessionStore;
