pub mod backoff;
pub mod coordinator;
pub mod index;
pub mod naming;
pub mod queue;
pub mod reconcile;
pub mod session;
pub mod status;
