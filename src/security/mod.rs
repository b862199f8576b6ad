//! Security features.
//!
//! HMAC-chained audit logging of every network state change.

mod audit;

pub use audit::{
    AuditConfig, AuditEntry, AuditLogger, AuditOutcome, DEFAULT_MAX_IN_MEMORY, GENESIS_HMAC,
    decode_key, verify_file,
};
