pub mod error;
pub mod messages;
pub mod utils;

pub use error::RpcError;
pub use messages::{
    Heartbeat,
    HeartbeatAck,
    PrepareReq,
    PrepareResp,
    ProposalNumber,
    ProposalReq,
    ProposalResp,
    SuccessNotify,
    SuccessResp,
};
pub use utils::RoleId;
