//! Link previews for URLs shared in posts and chat.
//!
//! Previews are best effort: any failure yields `None` and is never cached.
//! Successful previews are cached per URL. [`LinkPreviewService::prefetch`]
//! warms the cache in the background so rendering never waits on the network.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::application::error::FetchError;
use crate::cache::TtlCache;

/// Characters stripped from the end of a URL found in prose. Closing
/// brackets are handled separately by [`trim_trailing`].
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"'];
const URL_TERMINATORS: &[char] = &['<', '>', '"', '\'', '`'];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub site_name: Option<String>,
}

impl LinkPreview {
    /// A preview with nothing to show.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.image.is_none()
            && self.site_name.is_none()
    }
}

/// Retrieves preview metadata for a URL.
#[async_trait]
pub trait PreviewFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<LinkPreview, FetchError>;
}

/// Returns the first well-formed `http`/`https` URL in `text`.
pub fn extract_first_url(text: &str) -> Option<Url> {
    let mut rest = text;
    while let Some(start) = find_scheme(rest) {
        let candidate = &rest[start..];
        let end = candidate
            .find(|c: char| c.is_whitespace() || URL_TERMINATORS.contains(&c))
            .unwrap_or(candidate.len());
        let raw = trim_trailing(&candidate[..end]);
        if let Some(url) = parse_web_url(raw) {
            return Some(url);
        }
        rest = &candidate[end.max(1)..];
    }
    None
}

/// Strips trailing punctuation, keeping a closing bracket that pairs with
/// one opened inside the URL, as in `/wiki/Función_(matemática)`.
fn trim_trailing(raw: &str) -> &str {
    let mut trimmed = raw;
    while let Some(last) = trimmed.chars().next_back() {
        let strip = match last {
            ')' => unbalanced(trimmed, '(', ')'),
            ']' => unbalanced(trimmed, '[', ']'),
            '}' => unbalanced(trimmed, '{', '}'),
            other => TRAILING_PUNCTUATION.contains(&other),
        };
        if !strip {
            break;
        }
        trimmed = &trimmed[..trimmed.len() - last.len_utf8()];
    }
    trimmed
}

fn unbalanced(text: &str, open: char, close: char) -> bool {
    text.matches(close).count() > text.matches(open).count()
}

fn find_scheme(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    match (lower.find("http://"), lower.find("https://")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Parses `raw` and keeps it only if it is an `http`/`https` URL with a host.
pub fn parse_web_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    let web = matches!(url.scheme(), "http" | "https");
    (web && url.host_str().is_some_and(|host| !host.is_empty())).then_some(url)
}

#[derive(Clone)]
pub struct LinkPreviewService {
    fetcher: Arc<dyn PreviewFetcher>,
    cache: Arc<TtlCache<String, LinkPreview>>,
    ttl: Duration,
}

impl LinkPreviewService {
    pub fn new(
        fetcher: Arc<dyn PreviewFetcher>,
        cache: Arc<TtlCache<String, LinkPreview>>,
        ttl: Duration,
    ) -> Self {
        Self {
            fetcher,
            cache,
            ttl,
        }
    }

    /// Cached preview for `url`, fetching it on a miss. Never fails.
    pub async fn get_preview(&self, url: &str) -> Option<LinkPreview> {
        let url = parse_web_url(url.trim())?;
        if let Some(preview) = self.cache.get(url.as_str()) {
            return Some(preview);
        }

        match self.fetcher.fetch(&url).await {
            Ok(preview) if !preview.is_empty() => {
                self.cache
                    .set(url.as_str().to_string(), preview.clone(), self.ttl);
                Some(preview)
            }
            Ok(_) => {
                debug!(url = %url, "Link preview has no metadata");
                None
            }
            Err(err) => {
                debug!(url = %url, error = %err, "Link preview fetch failed");
                None
            }
        }
    }

    /// Preview for the first URL in `text`, if any.
    pub async fn preview_text(&self, text: &str) -> Option<LinkPreview> {
        let url = extract_first_url(text)?;
        self.get_preview(url.as_str()).await
    }

    /// Fetches `url` in the background unless it is already cached.
    ///
    /// Returns `None` when nothing was dispatched, including outside a tokio runtime.
    pub fn prefetch(&self, url: &str) -> Option<JoinHandle<()>> {
        let url = parse_web_url(url.trim())?;
        if self.cache.expires_at(url.as_str()).is_some() {
            return None;
        }
        let handle = Handle::try_current().ok()?;
        let service = self.clone();
        Some(handle.spawn(async move {
            service.get_preview(url.as_str()).await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::system_clock;

    #[test]
    fn extracts_first_url_and_trims_punctuation() {
        let url = extract_first_url("Mira esto: https://crunevo.com/notes/42. ¡Genial!")
            .expect("url");
        assert_eq!(url.as_str(), "https://crunevo.com/notes/42");

        let url = extract_first_url("(see http://example.org/a?b=1)").expect("url");
        assert_eq!(url.as_str(), "http://example.org/a?b=1");
    }

    #[test]
    fn keeps_parentheses_that_belong_to_the_url() {
        let url = extract_first_url("Ver https://es.wikipedia.org/wiki/Función_(matemática).")
            .expect("url");
        assert!(url.path().ends_with("_(matem%C3%A1tica)"), "{url}");

        let url = extract_first_url("(https://es.wikipedia.org/wiki/Límite_(matemática))")
            .expect("url");
        assert!(url.path().ends_with("_(matem%C3%A1tica)"), "{url}");

        let url = extract_first_url("[link: https://example.org/list]").expect("url");
        assert_eq!(url.as_str(), "https://example.org/list");
    }

    #[test]
    fn skips_malformed_and_non_web_urls() {
        assert_eq!(extract_first_url("no links here"), None);
        assert_eq!(extract_first_url("ftp://files.example.com"), None);
        let url = extract_first_url("broken http:// then https://ok.example/x").expect("url");
        assert_eq!(url.as_str(), "https://ok.example/x");
    }

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PreviewFetcher for CountingFetcher {
        async fn fetch(&self, url: &Url) -> Result<LinkPreview, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 500,
                });
            }
            Ok(LinkPreview {
                url: url.to_string(),
                title: Some("Title".to_string()),
                ..LinkPreview::default()
            })
        }
    }

    fn service(fail: bool) -> (LinkPreviewService, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            fail,
        });
        let cache = Arc::new(TtlCache::new(
            "preview",
            NonZeroUsize::new(16).expect("non-zero"),
            system_clock(),
        ));
        (
            LinkPreviewService::new(fetcher.clone(), cache, Duration::hours(6)),
            fetcher,
        )
    }

    #[tokio::test]
    async fn successful_previews_are_cached() {
        let (service, fetcher) = service(false);
        let first = service.get_preview("https://example.com/").await;
        let second = service.get_preview("https://example.com/").await;
        assert_eq!(first, second);
        assert_eq!(first.and_then(|p| p.title).as_deref(), Some("Title"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn previews_the_first_link_in_a_message() {
        let (service, fetcher) = service(false);
        let preview = service
            .preview_text("Apuntes aquí: https://crunevo.com/notes/42, y más en https://otro.example/")
            .await
            .expect("preview");
        assert_eq!(preview.url, "https://crunevo.com/notes/42");
        assert_eq!(preview.title.as_deref(), Some("Title"));

        assert_eq!(service.preview_text("sin enlaces").await, None);
        assert!(
            service
                .preview_text("otra vez https://crunevo.com/notes/42")
                .await
                .is_some()
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_yield_none_and_are_retried() {
        let (service, fetcher) = service(true);
        assert_eq!(service.get_preview("https://example.com/").await, None);
        assert_eq!(service.get_preview("https://example.com/").await, None);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_web_urls_are_never_fetched() {
        let (service, fetcher) = service(false);
        assert_eq!(service.get_preview("file:///etc/passwd").await, None);
        assert_eq!(service.get_preview("not a url").await, None);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn prefetch_warms_the_cache() {
        let (service, fetcher) = service(false);
        let handle = service.prefetch("https://example.com/a").expect("dispatched");
        handle.await.expect("task");
        assert!(service.prefetch("https://example.com/a").is_none());
        assert!(service.get_preview("https://example.com/a").await.is_some());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
