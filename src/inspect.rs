//! Request introspection reports for `/` and `/api`

use crate::netinfo::NetworkInfo;
use hyper::header::HOST;
use hyper::Request;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::net::SocketAddr;

/// Header values grouped by name, in first-seen name order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderGroups(Vec<(String, Vec<String>)>);

impl HeaderGroups {
    pub fn push(&mut self, name: &str, value: String) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => self.0.push((name.to_string(), vec![value])),
        }
    }

    /// All values recorded for `name`
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for HeaderGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// Everything the reports are built from
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub name: Option<String>,
    pub hostname: String,
    pub addresses: Vec<String>,
    pub remote_addr: Option<SocketAddr>,
    /// Headers in wire order, one entry per value
    pub headers: Vec<(String, String)>,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub host: Option<String>,
}

impl RequestFacts {
    /// Gather facts from a request and the local environment
    pub fn gather<B>(
        req: &Request<B>,
        remote_addr: Option<SocketAddr>,
        name: Option<&str>,
        network: &dyn NetworkInfo,
    ) -> Self {
        let headers = req
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Self {
            name: name.map(String::from),
            hostname: network.hostname(),
            addresses: network.addresses(),
            remote_addr,
            headers,
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            query: req.uri().query().filter(|q| !q.is_empty()).map(String::from),
            host: target_host(req),
        }
    }

    /// Path with `?query` appended when a query string is present
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Plain-text multi-line report
    pub fn text_report(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.name {
            out.push_str(&format!("Name: {}\n", name));
        }
        out.push_str(&format!("Hostname: {}\n", self.hostname));
        for ip in &self.addresses {
            out.push_str(&format!("IP: {}\n", ip));
        }
        let remote = self
            .remote_addr
            .map(|a| format!("{}:{}", a.ip(), a.port()))
            .unwrap_or_default();
        out.push_str(&format!("RemoteAddr:{}\n", remote));
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\n", name, value));
        }
        out
    }

    /// Structured report
    pub fn api_report(&self) -> ApiReport {
        let mut headers = HeaderGroups::default();
        for (name, value) in &self.headers {
            headers.push(name, value.clone());
        }

        ApiReport {
            hostname: self.hostname.clone(),
            ip: self.addresses.clone(),
            headers,
            url: self.url(),
            host: self.host.clone(),
            method: self.method.clone(),
            name: self.name.clone().unwrap_or_default(),
        }
    }
}

/// JSON body of `/api`
#[derive(Debug, Clone, Serialize)]
pub struct ApiReport {
    pub hostname: String,
    pub ip: Vec<String>,
    pub headers: HeaderGroups,
    pub url: String,
    pub host: Option<String>,
    pub method: String,
    pub name: String,
}

/// Hostname the request was addressed to, without port
fn target_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(strip_brackets(host).to_lowercase());
    }

    let raw = req.headers().get(HOST)?.to_str().ok()?;
    let host = if let Some(rest) = raw.strip_prefix('[') {
        rest.split(']').next()?
    } else {
        raw.split(':').next()?
    };
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}
