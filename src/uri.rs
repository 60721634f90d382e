//! Minimal URI grammar for naming transports.
//!
//! The accepted shape is `scheme://host[:port][?key=value[&key=value]*]`.
//! The host may be empty, the port must be plain decimal digits, and the
//! option block tolerates neither a dangling `?` or `&` nor a key without
//! `=value`. This is deliberately not a general URI parser; it covers
//! exactly what the drivers need.

use std::collections::HashMap;

use crate::error::{DriverError, Result};

/// A parsed transport locator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Uri {
    scheme: String,
    host: String,
    port: u32,
    options: HashMap<String, String>,
}

impl Uri {
    /// Parse `input` against the grammar above.
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgument`] on any syntax violation.
    pub fn parse(input: &str) -> Result<Self> {
        let Some(scheme_end) = input.find("://") else {
            return Err(DriverError::InvalidArgument(format!(
                "expected {input} to start with SCHEME://"
            )));
        };
        let scheme = &input[..scheme_end];
        let rest = &input[scheme_end + 3..];

        let host_end = rest.find([':', '?']).unwrap_or(rest.len());
        let host = &rest[..host_end];

        let mut port = 0;
        let mut options_block = None;

        match rest.as_bytes().get(host_end) {
            None => {}
            Some(b':') => {
                let after_colon = &rest[host_end + 1..];
                let digits_end = after_colon
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_colon.len());
                let digits = &after_colon[..digits_end];
                port = digits.parse().map_err(|_| {
                    DriverError::InvalidArgument(format!(
                        "expected port field to be only numbers in {input}"
                    ))
                })?;
                match after_colon.as_bytes().get(digits_end) {
                    None => {}
                    Some(b'?') => options_block = Some(&after_colon[digits_end + 1..]),
                    Some(_) => {
                        return Err(DriverError::InvalidArgument(format!(
                            "expected port field to be only numbers in {input}"
                        )));
                    }
                }
            }
            Some(b'?') => options_block = Some(&rest[host_end + 1..]),
            Some(_) => unreachable!("host_end points at ':', '?' or the end"),
        }

        let mut options = HashMap::new();
        if let Some(block) = options_block {
            for pair in block.split('&') {
                let Some((key, value)) = pair.split_once('=') else {
                    return Err(DriverError::InvalidArgument(format!(
                        "invalid options syntax in {input}, expected key=value pairs \
                         separated by &"
                    )));
                };
                options.insert(key.to_owned(), value.to_owned());
            }
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            host: host.to_owned(),
            port,
            options,
        })
    }

    /// Parse a `udp://` locator, accepting the historical
    /// `udp://host:remote_port:local_port` shape and rewriting it to
    /// `udp://host:remote_port?local_port=N`.
    ///
    /// The rewrite only fires on strings without `?`, `&` or `=`, and the
    /// colon-counting restricts it to IPv4 hosts; an unbracketed IPv6
    /// literal fails port parsing instead of being silently mis-split.
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgument`] on any syntax violation.
    pub fn parse_udp_compat(input: &str) -> Result<Self> {
        if input.contains(['?', '&', '=']) {
            return Self::parse(input);
        }
        let body_start = input.find("://").map_or(input.len(), |i| i + 3);
        let body = &input[body_start..];
        let Some(first_colon) = body.find(':') else {
            return Self::parse(input);
        };
        let last_colon = body.rfind(':').expect("a colon was just found");
        if first_colon == last_colon {
            return Self::parse(input);
        }
        let local_port = &body[last_colon + 1..];
        let rewritten = format!(
            "{}?local_port={local_port}",
            &input[..body_start + last_colon]
        );
        Self::parse(&rewritten)
    }

    /// The scheme in front of `://`.
    #[must_use]
    pub fn scheme(&self) -> &str { &self.scheme }

    /// The host part; may be empty.
    #[must_use]
    pub fn host(&self) -> &str { &self.host }

    /// The port, `0` when the locator carried none.
    #[must_use]
    pub fn port(&self) -> u32 { self.port }

    /// Look up an option value.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> { self.options.get(key).map(String::as_str) }

    /// Look up an option value, falling back to `default`.
    #[must_use]
    pub fn option_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.option(key).unwrap_or(default)
    }

    /// All options, for diagnostics.
    #[must_use]
    pub fn options(&self) -> &HashMap<String, String> { &self.options }
}

#[cfg(test)]
#[path = "uri_tests.rs"]
mod tests;
