//! Sticky session support.
//!
//! A sticky rule copies a session cookie into a request header so that the
//! `header` policy keeps a client on the same upstream. It can also mint the
//! cookie when the client has none.
//!
//! Rule grammar (whitespace separated):
//! ```text
//! cookie NAME                read NAME from the Cookie header
//! set-cookie NAME            as `cookie`, and mint a random value if absent
//! set-upstream-header NAME   copy the cookie value into request header NAME
//! cookie-path PATH           Path attribute for minted cookies (default "/")
//! nocache                    add `Cache-Control: no-cache` if missing
//! ```

use std::str::FromStr;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::upstream::error::ProxyError;

const MINTED_VALUE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyRule {
    cookie_name: Option<String>,
    cookie_path: String,
    header_name: Option<HeaderName>,
    set_cookie: bool,
    nocache: bool,
}

/// Response-side work left over after the request was prepared.
#[derive(Debug, Default)]
pub struct StickyResponse {
    set_cookie: Option<HeaderValue>,
    nocache: bool,
}

impl StickyRule {
    /// Header the sticky value is copied into, if any.
    pub fn header_name(&self) -> Option<&HeaderName> {
        self.header_name.as_ref()
    }

    /// Prepare the request and return what the response needs.
    pub fn apply(&self, req: &mut Request<Body>) -> StickyResponse {
        let mut response = StickyResponse {
            set_cookie: None,
            nocache: self.nocache,
        };

        let Some(cookie_name) = &self.cookie_name else {
            return response;
        };

        let mut value = read_cookie(req.headers(), cookie_name);
        if value.is_none() && self.set_cookie {
            let minted: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(MINTED_VALUE_LEN)
                .map(char::from)
                .collect();
            let cookie = format!("{}={}; Path={}", cookie_name, minted, self.cookie_path);
            response.set_cookie = HeaderValue::from_str(&cookie).ok();
            value = Some(minted);
        }

        if let (Some(header), Some(value)) = (&self.header_name, value) {
            if let Ok(v) = HeaderValue::from_str(&value) {
                req.headers_mut().insert(header.clone(), v);
            }
        }

        response
    }
}

impl StickyResponse {
    pub fn finish(self, headers: &mut HeaderMap) {
        if self.nocache && !headers.contains_key(CACHE_CONTROL) {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
        if let Some(cookie) = self.set_cookie {
            headers.append(SET_COOKIE, cookie);
        }
    }
}

impl FromStr for StickyRule {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rule = StickyRule {
            cookie_name: None,
            cookie_path: "/".to_string(),
            header_name: None,
            set_cookie: false,
            nocache: false,
        };

        let mut tokens = s.split_whitespace();
        while let Some(token) = tokens.next() {
            let mut argument = |what: &str| {
                tokens
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ProxyError::InvalidConfiguration(format!("sticky rule {what} is missing an argument"))
                    })
            };
            match token {
                "set-cookie" => {
                    rule.set_cookie = true;
                    rule.cookie_name = Some(argument("set-cookie")?);
                }
                "cookie" => rule.cookie_name = Some(argument("cookie")?),
                "set-upstream-header" => {
                    let name = argument("set-upstream-header")?;
                    let header = HeaderName::from_str(&name).map_err(|e| {
                        ProxyError::InvalidConfiguration(format!("invalid sticky header {name}: {e}"))
                    })?;
                    rule.header_name = Some(header);
                }
                "cookie-path" => rule.cookie_path = argument("cookie-path")?,
                "nocache" => rule.nocache = true,
                other => {
                    return Err(ProxyError::InvalidConfiguration(format!(
                        "unknown sticky rule token: {other}"
                    )))
                }
            }
        }

        Ok(rule)
    }
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}
