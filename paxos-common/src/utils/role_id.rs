use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identity of a cluster member (proposer/acceptor).
///
/// `RoleId` is a thin wrapper around `u64`, designed to:
/// - Keep role ids apart from indexes and proposal rounds in signatures
/// - Serve as a `HashMap`/`BTreeMap` key (ordered, hashable)
/// - Serialize transparently, so config files can key peers by plain numbers
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role-{}", self.0)
    }
}

impl From<u64> for RoleId {
    fn from(id: u64) -> Self {
        RoleId(id)
    }
}

impl FromStr for RoleId {
    type Err = std::num::ParseIntError;

    /// Accepts both `"3"` and `"role-3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("role-").unwrap_or(s);
        raw.parse::<u64>().map(RoleId)
    }
}
