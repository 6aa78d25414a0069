//! HTTP document fetcher.
//!
//! Fetches a URL, refuses hosts that resolve to private or loopback
//! addresses, and reduces HTML to plain text. Extraction is deliberately
//! simple: tags are dropped, script/style bodies skipped, whitespace
//! collapsed.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::core::provenance::is_internal_ip;

use super::{FetchedDocument, Fetcher, ProviderError};

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(5))
                .user_agent("claimcheck/0.1")
                .build()
                .unwrap_or_default(),
        }
    }

    /// Reject URLs whose host is (or resolves to) an internal address
    async fn check_ssrf(&self, url: &Url) -> Result<(), ProviderError> {
        let host = url
            .host_str()
            .ok_or_else(|| ProviderError::unknown(self.name(), format!("URL has no host: {}", url)))?;

        if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            if is_internal_ip(&ip) {
                return Err(ProviderError::unknown(self.name(), format!("Refusing internal address {}", ip)));
            }
            return Ok(());
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ProviderError::unknown(self.name(), format!("DNS lookup failed for {}: {}", host, e)))?;

        for addr in addrs {
            if is_internal_ip(&addr.ip()) {
                return Err(ProviderError::unknown(
                    self.name(),
                    format!("Refusing {}: resolves to internal address {}", host, addr.ip()),
                ));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http-fetch"
    }

    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        max_length: usize,
    ) -> Result<FetchedDocument, ProviderError> {
        let parsed = Url::parse(url)
            .map_err(|e| ProviderError::unknown(self.name(), format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::unknown(self.name(), format!("Unsupported scheme: {}", parsed.scheme())));
        }
        self.check_ssrf(&parsed).await?;

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.name(), &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(
                self.name(),
                status.as_u16(),
                format!("GET {} returned {}", url, status),
            ));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("html"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.name(), &e))?;

        let (title, text) = if is_html {
            (extract_title(&body), html_to_text(&body))
        } else {
            (String::new(), collapse_whitespace(&body))
        };

        Ok(FetchedDocument {
            text: truncate_chars(&text, max_length),
            title,
        })
    }
}

/// Contents of the first <title> element, if any
fn extract_title(html: &str) -> String {
    // ASCII lowering keeps byte offsets valid for slicing `html`
    let lower = html.to_ascii_lowercase();
    let Some(start) = lower.find("<title") else {
        return String::new();
    };
    let Some(open_end) = lower[start..].find('>').map(|i| start + i + 1) else {
        return String::new();
    };
    let Some(close) = lower[open_end..].find("</title>").map(|i| open_end + i) else {
        return String::new();
    };
    collapse_whitespace(&html[open_end..close])
}

/// Strip tags and skip script/style bodies
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut tag = String::new();
    let mut skipping: Option<&'static str> = None;

    for c in html.chars() {
        if in_tag {
            if c == '>' {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|ch: char| ch.is_whitespace())
                    .next()
                    .unwrap_or("")
                    .to_lowercase();
                let closing = tag.starts_with('/');
                match (name.as_str(), closing) {
                    ("script", false) => skipping = Some("script"),
                    ("style", false) => skipping = Some("style"),
                    (n, true) if skipping == Some("script") && n == "script" => skipping = None,
                    (n, true) if skipping == Some("style") && n == "style" => skipping = None,
                    _ => {}
                }
                out.push(' ');
                tag.clear();
            } else {
                tag.push(c);
            }
        } else if c == '<' {
            in_tag = true;
        } else if skipping.is_none() {
            out.push(c);
        }
    }

    collapse_whitespace(&decode_entities(&out))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_drops_scripts() {
        let html = "<html><head><title>T</title><script>var x = 1;</script></head>\
                    <body><p>Hello&nbsp;<b>world</b></p><style>p{}</style></body></html>";
        assert_eq!(html_to_text(html), "T Hello world");
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title("<html><TITLE lang=en> A  page </TITLE>"), "A page");
        assert_eq!(extract_title("<p>no title</p>"), "");
    }

    #[test]
    fn test_extract_title_with_non_ascii_text() {
        // \u{130} and the Kelvin sign change byte length under Unicode lowercasing
        assert_eq!(extract_title("<html>\u{130}<title>\u{e9}\u{e9}</title></html>"), "\u{e9}\u{e9}");
        assert_eq!(
            extract_title("<html>\u{212a}\u{212a}<TITLE>D\u{fc}sseldorf \u{130}stanbul</TITLE>"),
            "D\u{fc}sseldorf \u{130}stanbul"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn test_rejects_loopback() {
        let fetcher = HttpFetcher::new();
        let result = fetcher
            .fetch("http://127.0.0.1:8080/admin", Duration::from_secs(1), 1000)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher = HttpFetcher::new();
        let result = fetcher.fetch("file:///etc/passwd", Duration::from_secs(1), 1000).await;
        assert!(result.is_err());
    }
}
