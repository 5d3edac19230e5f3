//! Identity-provider descriptor: endpoints, client credentials, and the fixed scope list.
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering HTTPS-only
//! endpoints (loopback hosts excepted so local stubs work), the OAuth client, and the
//! loopback callback path used by sign-in.

pub mod descriptor;

pub use descriptor::*;
