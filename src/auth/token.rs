//! Token models owned by the authorization flows.

pub mod access;
pub mod secret;
pub mod state;
