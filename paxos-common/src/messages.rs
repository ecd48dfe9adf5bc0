//! messages.rs
//!
//! Request/response shapes of the acceptor and proposer roles.
//!
//! The peer layer only moves these around and counts replies; what a promise
//! or an acceptance means is decided by the roles themselves.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{error::RpcError, utils::RoleId};

/// Totally ordered proposal number: higher round wins, role id breaks ties.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalNumber {
    pub round: u64,
    pub role: RoleId,
}

impl ProposalNumber {
    pub fn new(round: u64, role: RoleId) -> Self {
        Self { round, role }
    }
}

/// Liveness pulse sent to `ProposerRole.Heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub from: RoleId,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub received: bool,
}

/// Prepare phase request (`AcceptorRole.Prepare`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReq {
    pub proposer: RoleId,
    pub proposal: ProposalNumber,
    pub index: u64,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResp {
    pub promised: bool,
    pub min_proposal: ProposalNumber,
    pub accepted_proposal: Option<ProposalNumber>,
    pub accepted_value: Option<Vec<u8>>,
    /// Set when the acceptor has accepted nothing at or beyond `index`.
    pub no_more_accepted: bool,
}

/// Accept phase request (`AcceptorRole.Accept`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalReq {
    pub proposer: RoleId,
    pub proposal: ProposalNumber,
    pub index: u64,
    pub value: Vec<u8>,
    pub first_unchosen_index: u64,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResp {
    pub min_proposal: ProposalNumber,
    pub first_unchosen_index: u64,
}

/// Chosen value notification (`AcceptorRole.Success`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessNotify {
    pub index: u64,
    pub value: Vec<u8>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResp {
    pub first_unchosen_index: u64,
}

/// Serializes a payload for the wire.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RpcError> {
    bincode::serialize(value).map_err(RpcError::from)
}

/// Deserializes a payload received from the wire.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RpcError> {
    bincode::deserialize(bytes).map_err(RpcError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_number_ordering() {
        let low = ProposalNumber::new(1, RoleId(9));
        let high = ProposalNumber::new(2, RoleId(1));
        let tie_break = ProposalNumber::new(2, RoleId(3));

        assert!(low < high);
        assert!(high < tie_break);
        assert_eq!(ProposalNumber::default(), ProposalNumber::new(0, RoleId(0)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<PrepareReq>(&[1, 2]).unwrap_err();
        assert!(matches!(err, RpcError::Codec(_)));
    }

    #[test]
    fn test_prepare_response_keeps_accepted_value() {
        let resp = PrepareResp {
            promised: true,
            min_proposal: ProposalNumber::new(4, RoleId(2)),
            accepted_proposal: Some(ProposalNumber::new(3, RoleId(1))),
            accepted_value: Some(b"set x=1".to_vec()),
            no_more_accepted: false,
        };

        let bytes = encode(&resp).unwrap();
        let back: PrepareResp = decode(&bytes).unwrap();
        assert_eq!(back.accepted_value.as_deref(), Some(&b"set x=1"[..]));
        assert_eq!(back, resp);
    }
}
