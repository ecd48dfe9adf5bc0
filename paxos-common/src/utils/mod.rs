//! utils
//!
//! Identity types shared by every crate of the cluster.

pub mod role_id;
pub use role_id::RoleId;
