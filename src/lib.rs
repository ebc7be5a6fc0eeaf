//! Spacewar server - authoritative entity replication and command protocol
//!
//! The server owns every networked entity, validates client commands against
//! the entity's authority holder, runs the fixed-tick simulation and pushes
//! field changes and lifecycle events to every observer.

pub mod app;
pub mod auth;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
