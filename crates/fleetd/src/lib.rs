//! Library surface of the fleetd daemon, shared by the binary and the
//! integration tests.

pub mod api;
pub mod config;
