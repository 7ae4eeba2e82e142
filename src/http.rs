//! Request and response value types shared by the store, the network and the strategies.

use std::collections::BTreeMap;
use std::fmt;

/// An intercepted request.
///
/// Header names are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: String,
  pub headers: BTreeMap<String, String>,
}

impl Request {
  pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      method: method.into().to_uppercase(),
      url: url.into(),
      headers: BTreeMap::new(),
    }
  }

  /// Shorthand for a GET request.
  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  /// The `Accept` header, if the request declared one.
  pub fn accept(&self) -> Option<&str> {
    self.header("accept")
  }

  /// Identity used for cache lookups: method plus full URL, headers ignored.
  pub fn key(&self) -> RequestKey {
    RequestKey {
      method: self.method.clone(),
      url: self.url.clone(),
    }
  }
}

/// Exact request identity inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
    }
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Response header fields in arrival order.
///
/// Names are lowercased; repeated fields (`set-cookie`, `link`) stay separate
/// entries and values are kept as raw bytes.
pub type HeaderList = Vec<(String, Vec<u8>)>;

/// A fully buffered response snapshot.
///
/// Cloning yields an independent copy, so a stored snapshot stays readable
/// no matter how many times it is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: HeaderList,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Append a header field, keeping any earlier field of the same name.
  pub fn with_header(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
    self.headers.push((name.to_lowercase(), value.into()));
    self
  }

  /// First value of a header field.
  pub fn header(&self, name: &str) -> Option<&[u8]> {
    self.header_values(name).next()
  }

  /// Every value of a header field, in arrival order.
  pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a [u8]> + 'a {
    let name = name.to_lowercase();
    self
      .headers
      .iter()
      .filter(move |(n, _)| *n == name)
      .map(|(_, v)| v.as_slice())
  }

  /// True for 2xx statuses.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
