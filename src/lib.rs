//! Authentication and session lifecycle service.
//!
//! The core lives in [`auth`]: credential verification, bearer tokens,
//! password resets and the guard/role gates composed into the axum router
//! built by [`app::build_app`].

pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod mail;
pub mod state;
