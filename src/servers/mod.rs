//! Server implementations
//!
//! The two server processes:
//! - auth_server: SRP6 logon and realm list
//! - realm_server: world session, player login and update push

pub mod auth;
pub mod realm;
