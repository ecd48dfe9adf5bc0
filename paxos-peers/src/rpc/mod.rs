pub mod client;
pub mod frame;
pub mod in_memory;
pub mod server;

use std::fmt;

pub use client::{TcpConnection, TcpConnector};
pub use in_memory::{InMemoryConnector, InMemoryPeer};
pub use server::{typed_handler, MethodHandler, RpcServer, RpcServerHandle};

/// RPC methods exposed by the proposer and acceptor roles.
///
/// The string forms are the handler names registered on the remote side and
/// travel on the wire as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Heartbeat,
    Prepare,
    Accept,
    Success,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::Heartbeat,
        Method::Prepare,
        Method::Accept,
        Method::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Heartbeat => "ProposerRole.Heartbeat",
            Method::Prepare => "AcceptorRole.Prepare",
            Method::Accept => "AcceptorRole.Accept",
            Method::Success => "AcceptorRole.Success",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_match_role_handlers() {
        assert_eq!(Method::Heartbeat.as_str(), "ProposerRole.Heartbeat");
        assert_eq!(Method::Prepare.as_str(), "AcceptorRole.Prepare");
        assert_eq!(Method::Accept.as_str(), "AcceptorRole.Accept");
        assert_eq!(Method::Success.as_str(), "AcceptorRole.Success");
    }

    #[test]
    fn test_method_from_name() {
        for method in Method::ALL {
            assert_eq!(Method::from_name(method.as_str()), Some(method));
        }
        assert_eq!(Method::from_name("AcceptorRole.Vote"), None);
    }
}
