//! Optional full-text extraction for collected sources.
//!
//! Fetches the result page and pulls the main text out of it, skipping
//! navigation chrome. Private and loopback targets are refused.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use dailybrief_shared::{DailyBriefError, ProviderError, ProviderResult, Result};

use crate::USER_AGENT;

/// Largest page body we are willing to parse (5 MB).
const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;

/// Elements whose text never belongs to the article.
const CHROME_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "svg",
];

const CHROME_CLASSES: &[&str] = &["sidebar", "nav", "menu", "cookie", "advert"];

/// Fetches pages and extracts their main text.
pub struct PageExtractor {
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_private: bool,
    max_bytes: usize,
}

impl PageExtractor {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DailyBriefError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            allow_private: false,
            max_bytes: MAX_PAGE_BYTES,
        })
    }

    #[cfg(test)]
    fn allow_private(mut self) -> Self {
        self.allow_private = true;
        self
    }

    #[cfg(test)]
    fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Fetch `url` and return its main text (empty when nothing readable was found).
    pub async fn fetch_text(&self, url: &str) -> ProviderResult<String> {
        let parsed =
            Url::parse(url).map_err(|e| ProviderError::Fatal(format!("{url}: invalid url: {e}")))?;
        if !self.allow_private && is_ssrf_target(&parsed) {
            warn!(%url, "refusing to fetch private address");
            return Err(ProviderError::Fatal(format!("{url}: private address")));
        }

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), None, ""));
        }
        // Content-Length may be absent (chunked), so the cap is enforced while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProviderError::Transient(format!("{url}: body read failed: {e}")))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(ProviderError::Fatal(format!(
                    "{url}: page exceeds {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        let text = extract_main_text(&String::from_utf8_lossy(&body));
        debug!(%url, chars = text.chars().count(), "extracted page text");
        Ok(text)
    }
}

/// Main text of an HTML page: the first of `main`, `article`,
/// `[role="main"]`, or `body`, without navigation chrome.
pub fn extract_main_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    for sel_str in ["main", "article", r#"[role="main"]"#, "body"] {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            let text = text_without_chrome(el);
            if !text.is_empty() {
                return text;
            }
        }
    }
    String::new()
}

fn text_without_chrome(root: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_chrome = node.ancestors().any(|a| {
            a.value().as_element().is_some_and(|e| {
                CHROME_TAGS.contains(&e.name()) || e.classes().any(|c| CHROME_CLASSES.contains(&c))
            })
        });
        if !in_chrome {
            parts.push(text);
        }
    }
    parts
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}
