//! Realmgate - login and world gateway
//!
//! Authenticates clients with SRP6, then speaks the framed world protocol
//! with header encryption and entity update blocks.

// ============================================
// Core Modules
// ============================================

/// Server configuration (YAML)
pub mod config;
/// Frame codec and header cipher
pub mod network;
/// Account, realm and character storage
pub mod database;
/// Object field tables and the update codec
pub mod game;
/// Per-connection session state
pub mod session;
/// Auth and realm servers
pub mod servers;
