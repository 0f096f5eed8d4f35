use serde::{Deserialize, Serialize};

/// Who is on the other end of a request, as far as the HTTP layer knows.
///
/// Attached to incidents and audit events; never used for decisions other
/// than keying anonymous rate limits by IP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
        }
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }
}
