//! Mount table access.
//!
//! Parses `/proc/mounts` into typed entries and answers the questions the cgroup resolver
//! needs: which cgroup filesystems are mounted and where.
mod error;
mod parser;
mod table;

pub use error::{Error, Result};
pub use parser::{MountEntry, MountField, ParseError, parse_mounts_line};
pub use table::{CGROUP_V1_FS_TYPE, MountTable, read_mount_table};
