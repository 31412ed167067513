//! HTTP fallback for listing description and posting time.
//!
//! Not a browser: plain GET requests carrying the browser session's
//! cookies. Two endpoints per listing, a public HTML fragment and an
//! internal JSON payload. Every network or parse failure degrades to an
//! empty result for that call.

use crate::record::TIMESTAMP_FORMAT;
use crate::renderer::RenderContext;
use crate::site;
use chrono::DateTime;
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use regex::{Captures, Regex};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use scraper::{Html, Selector};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimum length of an accepted description.
pub const MIN_DESCRIPTION_CHARS: usize = 80;
/// Minimum length of a JSON string considered as a description.
pub const MIN_PAYLOAD_STRING_CHARS: usize = 200;
/// Number of longest JSON strings inspected for a description key.
pub const MAX_PAYLOAD_HITS: usize = 200;

/// Guest fragment containers, in priority order.
const GUEST_CONTAINERS: [&str; 4] = [
    "div.show-more-less-html__markup",
    "div.description__text",
    "section.description",
    "div.jobs-description__content",
];

/// Posting-time keys, in priority order.
const POSTED_AT_KEYS: [&str; 2] = ["listedAt", "originalListedAt"];

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0";

fn guard_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^for\s*\(\s*;;\s*\);\s*").expect("guard regex is valid"))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#?[A-Za-z0-9]+;").expect("entity regex is valid"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("blank lines regex is valid"))
}

/// Authenticated HTTP session that backfills listing data.
pub struct FallbackClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    refresh_every: usize,
    processed: usize,
}

impl FallbackClient {
    pub fn new(base_url: &str, timeout: Duration, refresh_every: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            refresh_every: refresh_every.max(1),
            processed: 0,
        }
    }

    /// Number of listings fetched so far in this run.
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Rebuild the session from the browser's user agent and cookies.
    pub async fn refresh_session(&mut self, ctx: &dyn RenderContext) {
        let user_agent = match ctx.execute_js("navigator.userAgent").await {
            Ok(Value::String(ua)) if !ua.trim().is_empty() => ua,
            _ => FALLBACK_USER_AGENT.to_string(),
        };
        let cookies = match ctx.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("failed to read browser cookies: {e:#}");
                Vec::new()
            }
        };

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "accept-language", "en-US,en;q=0.9");
        insert_header(&mut headers, "accept", "*/*");
        insert_header(&mut headers, "referer", &format!("{}/jobs/", self.base_url));

        if !cookies.is_empty() {
            let cookie_header = cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            insert_header(&mut headers, "cookie", &cookie_header);
        }
        if let Some(jsid) = cookies.iter().find(|c| c.name == "JSESSIONID") {
            insert_header(&mut headers, "csrf-token", jsid.value.trim_matches('"'));
        }

        self.client = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        debug!("fallback session refreshed with {} cookies", cookies.len());
    }

    /// Description and posting time for one listing.
    ///
    /// The guest description wins whenever it is non-empty. Refreshes
    /// the session every `refresh_every` listings, starting with the
    /// first.
    pub async fn fetch_for_listing(
        &mut self,
        ctx: &dyn RenderContext,
        job_id: &str,
    ) -> (String, String) {
        if self.processed % self.refresh_every == 0 {
            self.refresh_session(ctx).await;
        }
        self.processed += 1;

        let guest = self.fetch_guest_description(job_id).await;
        let payload = self.fetch_internal_payload(job_id).await;

        let posted_at = payload
            .as_ref()
            .map(posted_at_from_payload)
            .unwrap_or_default();
        if !guest.is_empty() {
            return (guest, posted_at);
        }
        let description = payload
            .as_ref()
            .map(description_from_payload)
            .unwrap_or_default();
        (description, posted_at)
    }

    /// Description text from the public listing fragment.
    pub async fn fetch_guest_description(&self, job_id: &str) -> String {
        let url = site::guest_posting_url(&self.base_url, job_id);
        match self.get_text(&url, None).await {
            Some(body) => extract_guest_description(&body),
            None => String::new(),
        }
    }

    /// Parsed internal JSON payload, with the anti-scraping guard removed.
    pub async fn fetch_internal_payload(&self, job_id: &str) -> Option<Value> {
        let url = site::internal_posting_url(&self.base_url, job_id);
        let body = self.get_text(&url, Some("application/json")).await?;
        match parse_guarded_json(&body) {
            Some(value) => Some(value),
            None => {
                warn!("internal payload is not valid JSON job={job_id}");
                None
            }
        }
    }

    async fn get_text(&self, url: &str, accept: Option<&str>) -> Option<String> {
        let mut req = self.client.get(url).timeout(self.timeout);
        if let Some(accept) = accept {
            req = req.header(ACCEPT, accept);
        }
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("request failed url={url}: {e}");
                return None;
            }
        };

        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() || body.trim().is_empty() {
            warn!("status={} url={url} final_url={final_url}", status.as_u16());
            return None;
        }
        Some(body)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(HeaderName::from_static(name), v);
        }
        Err(_) => debug!("skipping header {name} with non-ASCII value"),
    }
}

/// Non-blank text nodes, trimmed and joined by newlines.
fn join_text<'a>(nodes: impl Iterator<Item = &'a str>) -> String {
    nodes
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Description from the guest HTML fragment.
///
/// Tries the known containers in order, then the whole document. Text
/// of at most [`MIN_DESCRIPTION_CHARS`] characters is rejected.
pub fn extract_guest_description(html: &str) -> String {
    let doc = Html::parse_document(html);
    for css in GUEST_CONTAINERS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            let text = join_text(el.text());
            if text.chars().count() > MIN_DESCRIPTION_CHARS {
                return text;
            }
        }
    }
    let text = join_text(doc.root_element().text());
    if text.chars().count() > MIN_DESCRIPTION_CHARS {
        text
    } else {
        String::new()
    }
}

/// Strip the `for(;;);` guard and parse.
pub fn parse_guarded_json(body: &str) -> Option<Value> {
    let stripped = guard_re().replace(body.trim(), "");
    serde_json::from_str(&stripped).ok()
}

/// Every string of at least `min_len` characters with its dotted path,
/// longest first.
pub fn find_long_strings(value: &Value, min_len: usize) -> Vec<(String, String)> {
    fn walk(value: &Value, path: &str, min_len: usize, hits: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let child = if path.is_empty() {
                        k.clone()
                    } else {
                        format!("{path}.{k}")
                    };
                    walk(v, &child, min_len, hits);
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    walk(v, &format!("{path}[{i}]"), min_len, hits);
                }
            }
            Value::String(s) => {
                let s = s.trim();
                if s.chars().count() >= min_len {
                    hits.push((path.to_string(), s.to_string()));
                }
            }
            _ => {}
        }
    }

    let mut hits = Vec::new();
    walk(value, "", min_len, &mut hits);
    hits.sort_by_key(|(_, s)| std::cmp::Reverse(s.chars().count()));
    hits
}

/// Description text from the internal payload.
///
/// Prefers the longest string under a `description` path among the
/// longest hits, else the longest string overall. Entities are decoded
/// and residual markup stripped.
pub fn description_from_payload(payload: &Value) -> String {
    let hits = find_long_strings(payload, MIN_PAYLOAD_STRING_CHARS);
    let best = hits
        .iter()
        .take(MAX_PAYLOAD_HITS)
        .find(|(path, _)| path.to_lowercase().contains("description"))
        .or_else(|| hits.first())
        .map(|(_, s)| s.as_str())
        .unwrap_or_default();
    if best.is_empty() {
        return String::new();
    }

    let mut text = decode_entities(best);
    if text.contains('<') && text.contains('>') {
        let fragment = Html::parse_fragment(&text);
        text = join_text(fragment.root_element().text());
    }
    let text = blank_lines_re().replace_all(&text, "\n\n").trim().to_string();
    if text.chars().count() > MIN_DESCRIPTION_CHARS {
        text
    } else {
        String::new()
    }
}

/// Decode character references only. Markup stays in place; an
/// unknown or malformed reference is kept verbatim.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    entity_re()
        .replace_all(s, |caps: &Captures| {
            unescape_with(&caps[0], resolve_html5_entity)
                .map(Cow::into_owned)
                .unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Posting time from the payload, formatted, or empty.
pub fn posted_at_from_payload(payload: &Value) -> String {
    POSTED_AT_KEYS
        .iter()
        .find_map(|key| find_epoch_millis(payload, key))
        .map(format_epoch_millis)
        .unwrap_or_default()
}

/// First positive number stored under `key`, depth first.
fn find_epoch_millis(value: &Value, key: &str) -> Option<f64> {
    match value {
        Value::Object(map) => {
            if let Some(ms) = map.get(key).and_then(Value::as_f64).filter(|ms| *ms > 0.0) {
                return Some(ms);
            }
            map.values().find_map(|v| find_epoch_millis(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_epoch_millis(v, key)),
        _ => None,
    }
}

/// Epoch milliseconds as a UTC timestamp string.
pub fn format_epoch_millis(ms: f64) -> String {
    DateTime::from_timestamp_millis(ms as i64)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::ScriptedContext;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn long(word: &str) -> String {
        std::iter::repeat(word).take(60).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_guest_container_priority() {
        let html = format!(
            r#"<html><body>
                <section class="description"><p>{}</p></section>
                <div class="description__text"><p>{}</p><p>more</p></div>
            </body></html>"#,
            long("section"),
            long("primary")
        );
        let text = extract_guest_description(&html);
        assert!(text.starts_with("primary"));
        assert!(text.ends_with("\nmore"));
    }

    #[test]
    fn test_guest_short_containers_fall_through() {
        let html = format!(
            r#"<div class="show-more-less-html__markup">too short</div><p>{}</p>"#,
            long("body")
        );
        let text = extract_guest_description(&html);
        assert!(text.starts_with("too short\nbody"));
        assert_eq!(extract_guest_description("<p>tiny</p>"), "");
    }

    #[test]
    fn test_guard_is_stripped() {
        let value = parse_guarded_json("for (;;);{\"a\":1}").unwrap();
        assert_eq!(value["a"], 1);
        assert!(parse_guarded_json("for (;;); not json").is_none());
    }

    #[test]
    fn test_description_prefers_description_path() {
        let payload = json!({
            "data": {
                "companyBlurb": long("blurb-longer-word"),
                "description": {"text": format!("&lt;p&gt;{}&lt;/p&gt;&lt;p&gt;Second&lt;/p&gt;", long("role"))}
            }
        });
        let text = description_from_payload(&payload);
        assert!(text.starts_with("role role"));
        assert!(text.ends_with("\nSecond"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_description_keeps_markup_line_breaks() {
        let payload = json!({
            "description": format!(
                "Benefits &amp; perks for R&D staff<ul><li>{}</li><li>Item two &#8211; &nbsp;remote</li></ul>",
                long("Item one")
            )
        });
        let text = description_from_payload(&payload);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Benefits & perks for R&D staff");
        assert!(lines[1].starts_with("Item one Item one"));
        assert_eq!(lines[2], "Item two \u{2013} \u{a0}remote");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_decode_entities_leaves_tags() {
        assert_eq!(decode_entities("a &lt;b&gt; <i>c</i> &bogus; &"), "a <b> <i>c</i> &bogus; &");
        assert_eq!(decode_entities("&#39;q&#x27;"), "'q'");
    }

    #[test]
    fn test_description_falls_back_to_longest() {
        let payload = json!({"a": long("x"), "b": [long("longer-token")]});
        assert!(description_from_payload(&payload).starts_with("longer-token"));
        assert_eq!(description_from_payload(&json!({"a": "short"})), "");
    }

    #[test]
    fn test_find_long_strings_paths() {
        let payload = json!({"a": {"b": [long("x")]}});
        let hits = find_long_strings(&payload, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a.b[0]");
    }

    #[test]
    fn test_posted_at_key_priority() {
        let payload = json!({
            "originalListedAt": 1_600_000_000_000u64,
            "nested": [{"listedAt": 0}, {"listedAt": 1_700_000_000_000u64}]
        });
        assert_eq!(posted_at_from_payload(&payload), "2023-11-14 22:13:20");
        assert_eq!(
            posted_at_from_payload(&json!({"originalListedAt": 1_600_000_000_000u64})),
            "2020-09-13 12:26:40"
        );
        assert_eq!(posted_at_from_payload(&json!({"other": 5})), "");
    }

    #[tokio::test]
    async fn test_guest_description_wins() {
        let server = MockServer::start().await;
        let guest = format!(r#"<div class="description__text">{}</div>"#, long("guest"));
        Mock::given(method("GET"))
            .and(path("/jobs-guest/jobs/api/jobPosting/42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(guest))
            .mount(&server)
            .await;
        let payload = json!({"description": long("payload"), "listedAt": 1_700_000_000_000u64});
        Mock::given(method("GET"))
            .and(path("/voyager/api/jobs/jobPostings/42"))
            .and(header("accept", "application/json"))
            .and(header("csrf-token", "ajax:123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("for(;;);{payload}")),
            )
            .mount(&server)
            .await;

        let ctx = ScriptedContext::new()
            .cookie("JSESSIONID", "\"ajax:123\"")
            .cookie("li_at", "token");
        let mut client = FallbackClient::new(&server.uri(), Duration::from_secs(5), 20);
        let (description, posted_at) = client.fetch_for_listing(&ctx, "42").await;
        assert!(description.starts_with("guest"));
        assert_eq!(posted_at, "2023-11-14 22:13:20");
        assert_eq!(client.processed(), 1);
    }

    #[tokio::test]
    async fn test_payload_used_when_guest_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs-guest/jobs/api/jobPosting/7"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/voyager/api/jobs/jobPostings/7"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"description": long("payload")})),
            )
            .mount(&server)
            .await;

        let ctx = ScriptedContext::new();
        let mut client = FallbackClient::new(&server.uri(), Duration::from_secs(5), 20);
        let (description, posted_at) = client.fetch_for_listing(&ctx, "7").await;
        assert!(description.starts_with("payload"));
        assert_eq!(posted_at, "");
    }

    #[tokio::test]
    async fn test_network_failure_degrades_to_empty() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let ctx = ScriptedContext::new();
        let mut client = FallbackClient::new(&uri, Duration::from_secs(2), 20);
        assert_eq!(client.fetch_for_listing(&ctx, "1").await, (String::new(), String::new()));
    }
}
