//! Session binding and bookkeeping.

pub mod binding;
pub mod registry;

pub use binding::{queue, QueuedChannel, SessionFactory};
pub use registry::SessionRegistry;
