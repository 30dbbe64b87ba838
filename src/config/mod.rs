//! Server configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ServerConfig`] | Listening address and protocol limits |
//! | [`ServerBuilder`] | Fluent, validating configuration builder |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for server configuration.
pub mod builder;

/// Configuration values and defaults.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ServerBuilder;
pub use options::ServerConfig;
