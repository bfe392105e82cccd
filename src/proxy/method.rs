//! The closed set of HTTP verbs the proxy will carry to the CA.

use std::fmt;
use std::str::FromStr;

use axum::http::Method;

use crate::proxy::error::ProxyError;

/// HTTP methods accepted for forwarding.
///
/// Anything outside this set is rejected with
/// [`ProxyError::UnsupportedMethod`] before a request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl ProxyMethod {
    /// Whether a request body may be attached for this method.
    pub fn carries_body(self) -> bool {
        matches!(self, ProxyMethod::Post | ProxyMethod::Put | ProxyMethod::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProxyMethod::Get => "GET",
            ProxyMethod::Post => "POST",
            ProxyMethod::Put => "PUT",
            ProxyMethod::Delete => "DELETE",
            ProxyMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for ProxyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMethod {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(ProxyMethod::Get),
            "POST" => Ok(ProxyMethod::Post),
            "PUT" => Ok(ProxyMethod::Put),
            "DELETE" => Ok(ProxyMethod::Delete),
            "PATCH" => Ok(ProxyMethod::Patch),
            _ => Err(ProxyError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl TryFrom<&Method> for ProxyMethod {
    type Error = ProxyError;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

impl From<ProxyMethod> for Method {
    fn from(m: ProxyMethod) -> Self {
        match m {
            ProxyMethod::Get => Method::GET,
            ProxyMethod::Post => Method::POST,
            ProxyMethod::Put => Method::PUT,
            ProxyMethod::Delete => Method::DELETE,
            ProxyMethod::Patch => Method::PATCH,
        }
    }
}
