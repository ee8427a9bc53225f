//! reqwest client construction shared by [`ReqwestTransport`] and the
//! adapter's native fallback.
//!
//! [`ReqwestTransport`]: crate::transport::ReqwestTransport

use reqwest::{Client, RequestBuilder};
use std::collections::HashMap;

use crate::client::ClientError;
use crate::options::TransportOptions;

pub const USER_AGENT: &str = concat!("qwen-chat/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client honoring the timeout and proxy settings.
///
/// An unparsable proxy is a configuration error rather than a silent
/// direct connection.
pub fn build_http_client(options: &TransportOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder().user_agent(USER_AGENT);

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("Invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Apply the configured per-request headers. Request-specific headers set
/// afterwards take precedence.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}
