//! Session cookie handling for raw HTTP disk transfers.
//!
//! The management API hands out its session as a `Set-Cookie` style string,
//! e.g. `vmware_soap_session="52a1..."; Path=/; HttpOnly; Secure;`. The NFC
//! transfer endpoint requires the same session, so the cookie is reshaped into
//! a `Cookie` header for the HTTP client.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};

use crate::error::{Error, Result};

/// Media type requested from the transfer endpoint.
pub const STREAM_VMDK_MEDIA_TYPE: &str = "application/x-vnd.vmware-streamVmdk";

/// A session cookie split into name and transfer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// Cookie name (e.g. `vmware_soap_session`).
    pub name: String,
    /// Value in the shape ` <value>; $<extra>`.
    pub value: String,
}

impl SessionCookie {
    /// Split a raw session cookie into its name and transfer value.
    ///
    /// Only the first attribute after the value is carried over, prefixed
    /// with `$`. Values may themselves contain `=`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split(';');
        let pair = parts.next().unwrap_or_default().trim();
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::session(format!("cookie has no name=value pair: '{raw}'")))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::session(format!("cookie has an empty name: '{raw}'")));
        }

        let value = match parts.next().map(str::trim_start) {
            Some(extra) if !extra.is_empty() => format!(" {value}; ${extra}"),
            _ => format!(" {value}"),
        };

        Ok(Self {
            name: name.to_string(),
            value,
        })
    }

    /// Render the cookie as a `Cookie` header value.
    pub fn header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Build the headers sent with every disk transfer request.
pub fn transfer_headers(cookie: &SessionCookie) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(STREAM_VMDK_MEDIA_TYPE));
    let value = HeaderValue::from_str(&cookie.header_value())
        .map_err(|e| Error::session(format!("cookie is not a valid header value: {e}")))?;
    headers.insert(COOKIE, value);
    Ok(headers)
}
