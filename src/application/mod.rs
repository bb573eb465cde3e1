pub mod approvals;
pub mod engine;
pub mod guard;
pub mod limits;
pub mod restrictions;
