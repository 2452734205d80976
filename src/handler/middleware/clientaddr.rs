use axum::extract::{ConnectInfo, FromRequestParts};
use http::{request::Parts, HeaderMap};
use std::{
    convert::Infallible,
    fmt::{self, Formatter},
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

const FORWARDED_HEADERS: [&str; 4] = [
    "x-client-ip",
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
];

/// Remote address of a request, corrected by the first proxy header that
/// carries a parseable IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr {
    pub addr: SocketAddr,
}

impl ClientAddr {
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn from_http_parts(headers: &HeaderMap, connect_info: Option<SocketAddr>) -> Self {
        let mut addr = connect_info
            .unwrap_or_else(|| SocketAddr::from((IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)));
        if let Some(ip) = forwarded_ip(headers) {
            addr.set_ip(ip);
        }
        ClientAddr { addr }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    FORWARDED_HEADERS.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?;
        // X-Forwarded-For lists the original client first
        value.split(',').next()?.trim().parse::<IpAddr>().ok()
    })
}

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let connect_info = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_http_parts(&parts.headers, connect_info))
    }
}

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
