//! Pending-change domain
//!
//! Models and persistence for proposed row edits and their approval
//! lifecycle.

mod models;
mod store;

pub use models::{ChangeOp, ChangeStatus, NewChangeRequest, PendingChange, PendingChangeView};
pub use store::ChangeRequestStore;
