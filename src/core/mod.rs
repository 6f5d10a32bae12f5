//! Core orchestration components
//!
//! Leaf mechanisms the engine composes: admission control, retry policy,
//! per-run allocation, the upload cache, the durable run ledger, asset pool
//! selection and prompt templating.

pub mod allocation;
pub mod rate_limiter;
pub mod retry;
pub mod selection;
pub mod state;
pub mod template;
pub mod upload_cache;

pub use allocation::{AllocationPlan, AllocationPlanner, GroupAssignment};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{RunState, StateManager};
pub use upload_cache::AssetUploadCache;
