//! Shared `SQLite` infrastructure for storage backends.
//!
//! ## Module Structure
//!
//! - [`connection`]: `Mutex<Connection>` locking, opening and pragmas
//! - [`codec`]: column encodings (embedding BLOBs, JSON lists, timestamps)
//! - [`metrics`]: per-operation metrics recording
//!
//! Each backend owns its own connection and database file; WAL mode keeps
//! readers and the single writer from blocking each other.

mod codec;
mod connection;
mod metrics;

pub use codec::{
    decode_embedding, encode_embedding, from_json_column, parse_enum_column, to_json, ts_from_sql,
    ts_to_sql,
};
pub use connection::{acquire_lock, configure_connection, open_connection, open_in_memory};
pub use metrics::{record_operation_metrics, timed};
