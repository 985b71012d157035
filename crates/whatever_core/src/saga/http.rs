//! Default [`MetadataExtractor`]: blocking HTTP GET plus a light HTML scan.

use super::{ExtractError, MetadataExtractor, PageMetadata};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::Url;
use std::collections::HashMap;
use std::time::Duration;

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));
static META_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid meta regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid attribute regex")
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

pub struct HttpMetadataExtractor {
    client: Client,
}

impl HttpMetadataExtractor {
    /// Builds a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("whatever/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl MetadataExtractor for HttpMetadataExtractor {
    fn extract(&self, text: &str) -> Result<PageMetadata, ExtractError> {
        let url = first_url(text)?;
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Status(status.as_u16()));
        }
        let body = response.text()?;
        parse_metadata(&body)
    }
}

/// The leading whitespace-separated token of `text`, as an http(s) URL.
pub fn first_url(text: &str) -> Result<Url, ExtractError> {
    let token = text.split_whitespace().next().unwrap_or_default();
    let url = Url::parse(token).map_err(|_| ExtractError::InvalidUrl(token.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ExtractError::InvalidUrl(token.to_string())),
    }
}

/// Title (`<title>`, else `og:title`) and thumbnail (`og:image`) of a page.
pub fn parse_metadata(html: &str) -> Result<PageMetadata, ExtractError> {
    let meta = meta_properties(html);

    let title = TITLE_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| clean_text(m.as_str()))
        .filter(|title| !title.is_empty())
        .or_else(|| {
            meta.get("og:title")
                .map(|value| clean_text(value))
                .filter(|title| !title.is_empty())
        })
        .ok_or(ExtractError::NoTitle)?;

    let thumbnail = meta
        .get("og:image")
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    Ok(PageMetadata { title, thumbnail })
}

/// `property`/`name` → `content` for every `<meta>` tag; first wins.
fn meta_properties(html: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    for tag in META_RE.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for caps in ATTR_RE.captures_iter(tag.as_str()) {
            let name = caps[1].to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            match name.as_str() {
                "property" | "name" if key.is_none() => key = Some(value.to_ascii_lowercase()),
                "content" => content = Some(value),
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content) {
            properties.entry(key).or_insert(content);
        }
    }
    properties
}

fn clean_text(raw: &str) -> String {
    let decoded = raw
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    WHITESPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_tag_wins_over_open_graph() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <title>
              Example &amp; Co
            </title>
            <meta content="https://example.com/a.png" property="og:image" />
        </head></html>"#;
        assert_eq!(
            parse_metadata(html).unwrap(),
            PageMetadata {
                title: "Example & Co".to_string(),
                thumbnail: "https://example.com/a.png".to_string(),
            }
        );
    }

    #[test]
    fn open_graph_title_is_the_fallback() {
        let html = r#"<head><title>  </title><meta property='og:title' content='Fallback'></head>"#;
        let meta = parse_metadata(html).unwrap();
        assert_eq!(meta.title, "Fallback");
        assert_eq!(meta.thumbnail, "");
    }

    #[test]
    fn page_without_any_title_is_an_error() {
        assert!(matches!(
            parse_metadata("<html><body>hi</body></html>"),
            Err(ExtractError::NoTitle)
        ));
    }

    #[test]
    fn only_leading_http_token_is_fetched() {
        assert_eq!(
            first_url("https://example.com/page read later").unwrap().as_str(),
            "https://example.com/page"
        );
        assert!(matches!(first_url("httpfoo bar"), Err(ExtractError::InvalidUrl(_))));
        assert!(matches!(first_url("ftp://example.com"), Err(ExtractError::InvalidUrl(_))));
    }
}
