//! Who speaks next, and the bookkeeping behind it.

pub mod selection;
pub mod state;

pub use selection::{Selection, SelectionPolicy, SelectionSource, max_concurrency, select_next};
pub use state::SchedulerState;
