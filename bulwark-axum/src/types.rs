use std::net::IpAddr;

use bulwark::RequestContext;
use serde::{Deserialize, Serialize};

/// Who sent the request, as far as headers and the socket can tell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl From<ConnectionInfo> for RequestContext {
    fn from(info: ConnectionInfo) -> Self {
        RequestContext::new(info.ip, info.user_agent)
    }
}

impl ConnectionInfo {
    pub fn to_context(&self) -> RequestContext {
        RequestContext::new(self.ip.clone(), self.user_agent.clone())
    }
}

/// Caller IP extracted with [`client_ip`](crate::client_ip). `None` when
/// neither forwarding headers nor the socket address yield one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}
