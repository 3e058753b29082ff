//! mapsession: Signal-Routing Session Management
//!
//! Saves the connections of a live endpoint graph as session documents,
//! loads them back (staging connections whose endpoints are not yet present),
//! and keeps persistent sessions converged while devices come and go.

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod expression;
pub mod graph;
pub mod interactive;
pub mod logging;
pub mod persistence;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod shutdown;
pub mod upgrade;
