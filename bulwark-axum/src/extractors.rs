use std::net::{IpAddr, SocketAddr};

use axum::{
    RequestPartsExt,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, StatusCode, request::Parts},
};
use axum_extra::{TypedHeader, headers::UserAgent};

use crate::types::{ClientIp, ConnectionInfo};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Best guess at the caller's IP address.
///
/// Checks, in order, the first entry of `X-Forwarded-For`, then `X-Real-IP`,
/// then the socket peer. Values that do not parse as an IP address (with or
/// without a port) are skipped.
///
/// Forwarding headers are client-controlled unless a trusted proxy rewrites
/// them, so only deploy this behind one.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(parse_ip);

    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_ip)
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| peer.map(|addr| addr.ip()))
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

fn peer_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(&parts.headers, peer_addr(parts))))
    }
}

impl<S> FromRequestParts<S> for ConnectionInfo
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .extract::<Option<TypedHeader<UserAgent>>>()
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid user agent header"))?
            .map(|ua| ua.to_string());

        let ip = client_ip(&parts.headers, peer_addr(parts)).map(|ip| ip.to_string());

        Ok(ConnectionInfo { ip, user_agent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.1:50000".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_wins() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1, 10.0.0.2"),
            ("x-real-ip", "198.51.100.9"),
        ]);
        assert_eq!(
            client_ip(&map, peer()),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn test_real_ip_fallback() {
        let map = headers(&[("x-real-ip", " 198.51.100.9 ")]);
        assert_eq!(
            client_ip(&map, peer()),
            Some("198.51.100.9".parse().unwrap())
        );
    }

    #[test]
    fn test_invalid_values_are_skipped() {
        let map = headers(&[("x-forwarded-for", "unknown"), ("x-real-ip", "not-an-ip")]);
        assert_eq!(client_ip(&map, peer()), Some("192.0.2.1".parse().unwrap()));

        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_ports_and_ipv6() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7:8443")]);
        assert_eq!(client_ip(&map, None), Some("203.0.113.7".parse().unwrap()));

        let map = headers(&[("x-forwarded-for", "2001:db8::1")]);
        assert_eq!(client_ip(&map, None), Some("2001:db8::1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_connection_info_extractor() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .header("user-agent", "curl/8.5.0")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let info = ConnectionInfo::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(info.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.5.0"));

        let context = info.to_context();
        assert_eq!(context.ip(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_client_ip_uses_connect_info() {
        let mut request = Request::builder().body(()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("192.0.2.44:1234".parse().unwrap()));
        let (mut parts, _) = request.into_parts();

        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ip, Some("192.0.2.44".parse().unwrap()));
    }
}
