//! The `dispatcher` module multiplexes many subject registrations onto one
//! callback thread.
//!
//! Concurrency notes:
//! - The registration map is the only state touched by both the dispatch
//!   thread and callers. Lookup-and-count and check-and-remove each run under
//!   its lock, so an external unsubscribe can never race a delivery into a
//!   double count or a second removal.
//! - The lock is never held while the handler runs, which is what lets the
//!   handler unsubscribe (or stop) its own dispatcher.

pub mod engine;

pub use engine::Dispatcher;
