//! Credential-injecting [`HttpClient`](super::HttpClient) wrappers.

mod url_param;

pub use url_param::UrlParam;
