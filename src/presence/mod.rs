//! Device presence (online/offline heartbeat)

mod scheduler;

pub use scheduler::PresenceScheduler;
