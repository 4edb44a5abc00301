//! The repowatch daemon: collectors, poll loops, persistence, event hub and
//! the HTTP/SSE surface.

pub mod collect;
pub mod config;
pub mod events;
pub mod http;
pub mod hub;
pub mod scheduler;
pub mod store;
