//! redb table definitions for the policy store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Keys follow the pattern `{namespace}/{name}`.

use redb::TableDefinition;

/// Elasticity policies keyed by `{namespace}/{name}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Scale records of managed deployments keyed by `{namespace}/{deployment}`.
pub const SCALES: TableDefinition<&str, &[u8]> = TableDefinition::new("scales");
