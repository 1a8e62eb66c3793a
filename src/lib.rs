//! Exam clock synchronization client.
//!
//! Keeps a shared list of exams and facility-occupancy flags in step with
//! the other clocks attached to a relay, resolves clock-id clashes, and
//! arbitrates control requests from peers.

pub mod channel;
pub mod client;
pub mod collision;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod exam;
pub mod identity;
pub mod occupancy;
pub mod sync;
pub mod timefmt;
