//! HTTP front end for the Bastion edge gateway.
//!
//! Every inbound request runs through the [`Pipeline`]: credential
//! resolution, authorization, rate limiting and routing, in that order.
//! Configuration is loaded by [`config`], assembled by [`bootstrap`] and
//! served through the axum router in [`routes`].

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;

pub use config::{ConfigError, GatewayConfig, RuntimeEnv};
pub use error::GatewayError;
pub use pipeline::{Pipeline, Stage};
