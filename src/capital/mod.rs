//! Capital Module
//!
//! Capital state, the reinvestment/allocation policy, and state persistence.

pub mod allocator;
pub mod state;
pub mod store;

pub use allocator::{AllocationPolicy, CapitalAllocator};
pub use state::{CapitalState, CapitalSummary, ProfitEntry};
pub use store::{JsonStateStore, StateStore};
