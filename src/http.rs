use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{BrowseError, Result};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Form `method` attribute; anything but POST means GET.
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some(m) if m.trim().eq_ignore_ascii_case("post") => Self::Post,
            _ => Self::Get,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// URL-encoded form POST with content type and length set.
    pub fn post_form(url: Url, body: String) -> Self {
        let headers = vec![
            ("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];
        Self {
            method: Method::Post,
            url,
            headers,
            body: Some(body),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Follow-up GET for a redirect. Body, content headers and cookies are
    /// dropped; the session re-attaches cookies from its jar.
    pub fn redirected(&self, location: Url) -> Self {
        let headers = self
            .headers
            .iter()
            .filter(|(k, _)| {
                !["content-type", "content-length", "cookie"]
                    .iter()
                    .any(|h| k.eq_ignore_ascii_case(h))
            })
            .cloned()
            .collect();
        Self {
            method: Method::Get,
            url: location,
            headers,
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.status != 304
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Header names and values as strings. Non-UTF-8 bytes become U+FFFD
/// instead of dropping the value, so a Latin-1 `Location` still points somewhere.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// One request/response exchange. Implementations must not follow redirects.
pub trait Transport {
    fn send(&self, request: &Request) -> Result<Response>;
}

/// Blocking HTTP over `reqwest`, redirects left to the session.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| BrowseError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> Result<Response> {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url.as_str()),
            Method::Post => self.client.post(request.url.as_str()),
        };
        for (name, value) in &request.headers {
            // reqwest derives the length from the body it sends.
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .map_err(|e| BrowseError::Transport(format!("{} {}: {e}", request.method, request.url)))?;

        let status = response.status().as_u16();
        let headers = header_pairs(response.headers());
        let body = response
            .text()
            .map_err(|e| BrowseError::Transport(format!("reading body of {}: {e}", request.url)))?;

        debug!(status = status, url = %request.url, body_len = body.len(), "response received");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn method_from_attr() {
        assert_eq!(Method::from_attr(Some("POST")), Method::Post);
        assert_eq!(Method::from_attr(Some(" post ")), Method::Post);
        assert_eq!(Method::from_attr(Some("get")), Method::Get);
        assert_eq!(Method::from_attr(Some("dialog")), Method::Get);
        assert_eq!(Method::from_attr(None), Method::Get);
    }

    #[test]
    fn post_form_sets_content_headers() {
        let req = Request::post_form(url("http://example.com/s"), "q=abc".into());
        assert_eq!(req.header("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(req.header("Content-Length"), Some("5"));
    }

    #[test]
    fn redirected_request_is_plain_get() {
        let mut req = Request::post_form(url("http://example.com/s"), "q=abc".into());
        req.set_header("Cookie", "a=1");
        let next = req.redirected(url("http://example.com/results"));
        assert_eq!(next.method, Method::Get);
        assert!(next.body.is_none());
        assert!(next.headers.is_empty());
    }

    #[test]
    fn redirect_status_classes() {
        assert!(Response::new(302, "").is_redirect());
        assert!(Response::new(307, "").is_redirect());
        assert!(!Response::new(304, "").is_redirect());
        assert!(!Response::new(200, "").is_redirect());
        assert!(Response::new(404, "").is_error());
        assert!(!Response::new(302, "").is_error());
    }

    #[test]
    fn non_utf8_header_value_is_kept() {
        use reqwest::header::{HeaderValue, LOCATION};

        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_bytes(b"/caf\xe9.html").unwrap());
        let pairs = header_pairs(&headers);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "location");
        assert_eq!(pairs[0].1, "/caf\u{fffd}.html");
    }
}
