//! Header conversion between the adapter and the callback transport.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use tracing::warn;

/// Flatten outbound header pairs into the plain map the transport expects.
///
/// Names are lower-cased and repeated names are joined with `", "`. If any
/// pair is not a valid header, the whole set is dropped.
pub fn to_plain_headers(pairs: &[(String, String)]) -> HashMap<String, String> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value.trim()).ok());
        match parsed {
            Some((name, value)) => {
                headers.append(name, value);
            }
            None => {
                warn!(header = %name, "unable to parse request headers, sending none");
                return HashMap::new();
            }
        }
    }
    plain_headers(&headers)
}

/// Render a header map as a plain name→value map.
pub fn plain_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut plain: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        plain
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    plain
}

/// Parse the raw `name: value` block a transport reports for a response.
///
/// Malformed lines are skipped; an absent block yields an empty map.
pub fn parse_raw_headers(raw: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(raw) = raw else {
        return headers;
    };

    for line in raw.trim().lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(line, "unable to parse response header"),
        }
    }
    headers
}

/// Render a header map back into the raw block form transports report.
pub fn render_raw_headers(headers: &HeaderMap) -> String {
    let mut raw = String::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            raw.push_str(name.as_str());
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str("\r\n");
        }
    }
    raw
}
