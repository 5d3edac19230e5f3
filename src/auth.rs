//! Credential data model: the persisted sign-in state, derived access tokens, and scopes.

pub mod scope;
pub mod token;

pub use scope::*;
pub use token::{access::*, secret::*, state::*};
