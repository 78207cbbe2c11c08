use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ExtractOptions, Extractor};
use crate::record::RawItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    Css(&'static str),
    XPath(&'static str),
}

/// A live, exclusively owned browser tab.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;
    /// Number of elements currently matching `locator`.
    async fn count(&self, locator: Locator) -> Result<usize>;
    /// Click the first match. `Ok(false)` when nothing matched.
    async fn click(&self, locator: Locator) -> Result<bool>;
    /// Clear the first match, type `text` and press Enter.
    async fn submit_text(&self, locator: Locator, text: &str) -> Result<bool>;
    async fn scroll_to_bottom(&self) -> Result<()>;
    async fn page_source(&self) -> Result<String>;
    async fn close(&self) -> Result<()>;
}

/// Starts fresh, isolated sessions.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self, headless: bool) -> Result<Box<dyn PageDriver>>;
}

/// Poll until `locator` matches something or `timeout` passes.
pub async fn wait_for(
    page: &dyn PageDriver,
    locator: Locator,
    timeout: Duration,
    poll: Duration,
) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if page.count(locator).await? > 0 {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(poll).await;
    }
}

#[derive(Debug, Clone)]
pub struct ScrollPolicy {
    pub max_rounds: usize,
    /// Consecutive rounds without new candidates before giving up.
    pub stall_limit: usize,
    pub pause: Duration,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 6,
            stall_limit: 2,
            pause: Duration::from_secs(1),
        }
    }
}

/// Scroll to load lazily rendered results. Stops after `max_rounds`, after
/// `stall_limit` rounds with no growth, or once twice `max_results`
/// candidates are visible. Returns the last candidate count.
pub async fn scroll_until_settled(
    page: &dyn PageDriver,
    candidates: Locator,
    max_results: usize,
    policy: &ScrollPolicy,
) -> Result<usize> {
    let target = max_results.saturating_mul(2);
    let mut seen = page.count(candidates).await?;
    let mut stalls = 0;

    for round in 0..policy.max_rounds {
        if seen >= target {
            break;
        }
        page.scroll_to_bottom().await?;
        tokio::time::sleep(policy.pause).await;
        let now = page.count(candidates).await?;
        stalls = if now > seen { 0 } else { stalls + 1 };
        seen = now;
        if stalls >= policy.stall_limit {
            debug!("Scroll stalled at {} candidates after {} rounds", seen, round + 1);
            break;
        }
    }
    Ok(seen)
}

/// Where things live on a site's pages.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub home: &'static str,
    /// Popup to close before searching, if the site shows one.
    pub dismiss: Option<Locator>,
    pub search_box: Locator,
    /// Elements that count as product candidates while scrolling.
    pub candidates: Locator,
}

/// A dynamically rendered shop: page layout plus an HTML parser.
pub trait BrowserSite: Send + Sync {
    fn id(&self) -> &'static str;
    fn page(&self) -> SearchPage;
    fn parse(&self, html: &str, max_results: usize) -> Vec<RawItem>;
}

#[derive(Debug, Clone)]
pub struct Timings {
    pub dismiss_wait: Duration,
    pub search_wait: Duration,
    pub settle: Duration,
    pub poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            dismiss_wait: Duration::from_secs(5),
            search_wait: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            poll: Duration::from_millis(250),
        }
    }
}

pub struct BrowserExtractor<S> {
    site: S,
    browser: Arc<dyn Browser>,
    scroll: ScrollPolicy,
    timings: Timings,
}

impl<S: BrowserSite> BrowserExtractor<S> {
    pub fn new(site: S, browser: Arc<dyn Browser>) -> Self {
        Self {
            site,
            browser,
            scroll: ScrollPolicy::default(),
            timings: Timings::default(),
        }
    }

    pub fn with_scroll(mut self, scroll: ScrollPolicy) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    async fn drive(&self, page: &dyn PageDriver, query: &str, max_results: usize) -> Result<Vec<RawItem>> {
        let id = self.site.id();
        let layout = self.site.page();
        let t = &self.timings;

        page.goto(layout.home).await?;

        if let Some(popup) = layout.dismiss {
            match wait_for(page, popup, t.dismiss_wait, t.poll).await {
                Ok(true) => {
                    if let Err(e) = page.click(popup).await {
                        debug!("[{}] could not close popup: {:#}", id, e);
                    }
                }
                Ok(false) => {}
                Err(e) => debug!("[{}] popup check failed: {:#}", id, e),
            }
        }

        if !wait_for(page, layout.search_box, t.search_wait, t.poll).await? {
            warn!("[{}] search field did not appear within {:?}", id, t.search_wait);
            return Ok(Vec::new());
        }
        if !page.submit_text(layout.search_box, query).await? {
            warn!("[{}] search field disappeared before typing", id);
            return Ok(Vec::new());
        }
        tokio::time::sleep(t.settle).await;

        let visible = scroll_until_settled(page, layout.candidates, max_results, &self.scroll).await?;
        debug!("[{}] {} candidate elements visible", id, visible);

        let html = page.page_source().await?;
        let items = self.site.parse(&html, max_results);
        info!("[{}] Parsed {} unique products.", id, items.len());
        Ok(items)
    }
}

#[async_trait]
impl<S: BrowserSite> Extractor for BrowserExtractor<S> {
    fn id(&self) -> &'static str {
        self.site.id()
    }

    async fn extract(
        &self,
        query: &str,
        max_results: usize,
        options: &ExtractOptions,
    ) -> Result<Vec<RawItem>> {
        let page = match self.browser.open(options.headless).await {
            Ok(page) => page,
            Err(e) => {
                warn!("[{}] could not start browser session: {:#}", self.id(), e);
                return Ok(Vec::new());
            }
        };

        let result = self.drive(page.as_ref(), query, max_results).await;

        if let Err(e) = page.close().await {
            debug!("[{}] error while closing browser session: {:#}", self.id(), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;

    /// Scripted tab: candidate counts grow by `growth` per scroll up to `cap`.
    struct FakePage {
        candidates: AtomicUsize,
        growth: usize,
        cap: usize,
        has_search_box: bool,
        fail_source: bool,
        html: String,
        scrolls: AtomicUsize,
        typed: Arc<Mutex<Option<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl FakePage {
        fn new(html: &str, closed: Arc<AtomicBool>) -> Self {
            Self {
                candidates: AtomicUsize::new(0),
                growth: 0,
                cap: 0,
                has_search_box: true,
                fail_source: false,
                html: html.to_string(),
                scrolls: AtomicUsize::new(0),
                typed: Arc::new(Mutex::new(None)),
                closed,
            }
        }
    }

    #[async_trait]
    impl PageDriver for FakePage {
        async fn goto(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn count(&self, locator: Locator) -> Result<usize> {
            Ok(match locator {
                Locator::Css("#search") => usize::from(self.has_search_box),
                Locator::Css("li") => self.candidates.load(Ordering::SeqCst),
                _ => 0,
            })
        }

        async fn click(&self, _locator: Locator) -> Result<bool> {
            Ok(false)
        }

        async fn submit_text(&self, _locator: Locator, text: &str) -> Result<bool> {
            *self.typed.lock().unwrap() = Some(text.to_string());
            Ok(true)
        }

        async fn scroll_to_bottom(&self) -> Result<()> {
            self.scrolls.fetch_add(1, Ordering::SeqCst);
            let now = self.candidates.load(Ordering::SeqCst);
            self.candidates
                .store((now + self.growth).min(self.cap), Ordering::SeqCst);
            Ok(())
        }

        async fn page_source(&self) -> Result<String> {
            if self.fail_source {
                anyhow::bail!("session crashed");
            }
            Ok(self.html.clone())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct OneShot(Mutex<Option<FakePage>>);

    #[async_trait]
    impl Browser for OneShot {
        async fn open(&self, _headless: bool) -> Result<Box<dyn PageDriver>> {
            match self.0.lock().unwrap().take() {
                Some(page) => Ok(Box::new(page)),
                None => anyhow::bail!("chromedriver not reachable"),
            }
        }
    }

    struct ListSite;

    impl BrowserSite for ListSite {
        fn id(&self) -> &'static str {
            "List"
        }

        fn page(&self) -> SearchPage {
            SearchPage {
                home: "https://shop.test/",
                dismiss: Some(Locator::XPath("//button[text()='✕']")),
                search_box: Locator::Css("#search"),
                candidates: Locator::Css("li"),
            }
        }

        fn parse(&self, html: &str, max_results: usize) -> Vec<RawItem> {
            html.split("<li>")
                .skip(1)
                .take(max_results)
                .map(|chunk| {
                    let mut item = RawItem::new();
                    let title = chunk.split("</li>").next().unwrap_or_default();
                    item.insert("title".into(), Value::String(title.to_string()));
                    item
                })
                .collect()
        }
    }

    fn fast() -> Timings {
        Timings {
            dismiss_wait: Duration::from_millis(5),
            search_wait: Duration::from_millis(5),
            settle: Duration::from_millis(1),
            poll: Duration::from_millis(1),
        }
    }

    fn policy(max_rounds: usize, stall_limit: usize) -> ScrollPolicy {
        ScrollPolicy {
            max_rounds,
            stall_limit,
            pause: Duration::from_millis(1),
        }
    }

    fn extractor(page: Option<FakePage>) -> BrowserExtractor<ListSite> {
        BrowserExtractor::new(ListSite, Arc::new(OneShot(Mutex::new(page))))
            .with_timings(fast())
            .with_scroll(policy(3, 2))
    }

    #[tokio::test]
    async fn scroll_stops_on_stall() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut page = FakePage::new("", closed);
        page.growth = 3;
        page.cap = 6;
        let seen = scroll_until_settled(&page, Locator::Css("li"), 10, &policy(20, 2))
            .await
            .unwrap();
        assert_eq!(seen, 6);
        // two growing rounds, then two stalled ones
        assert_eq!(page.scrolls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn scroll_stops_at_twice_the_cap() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut page = FakePage::new("", closed);
        page.growth = 5;
        page.cap = 100;
        let seen = scroll_until_settled(&page, Locator::Css("li"), 4, &policy(20, 2))
            .await
            .unwrap();
        assert_eq!(seen, 10);
        assert_eq!(page.scrolls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn scroll_respects_round_limit() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut page = FakePage::new("", closed);
        page.growth = 1;
        page.cap = 1000;
        scroll_until_settled(&page, Locator::Css("li"), 500, &policy(3, 2))
            .await
            .unwrap();
        assert_eq!(page.scrolls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn extracts_and_closes_session() {
        let closed = Arc::new(AtomicBool::new(false));
        let page = FakePage::new("<ul><li>a</li><li>b</li><li>c</li></ul>", closed.clone());
        let typed = page.typed.clone();
        let items = extractor(Some(page))
            .extract("mug", 2, &ExtractOptions::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "a");
        assert_eq!(typed.lock().unwrap().as_deref(), Some("mug"));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_search_box_is_empty_not_error() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut page = FakePage::new("<li>a</li>", closed.clone());
        page.has_search_box = false;
        let items = extractor(Some(page))
            .extract("mug", 5, &ExtractOptions::default())
            .await
            .unwrap();
        assert!(items.is_empty());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn session_closed_when_driving_fails() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut page = FakePage::new("<li>a</li>", closed.clone());
        page.fail_source = true;
        let result = extractor(Some(page))
            .extract("mug", 5, &ExtractOptions::default())
            .await;
        assert!(result.is_err());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn browser_that_cannot_start_yields_nothing() {
        let items = extractor(None)
            .extract("mug", 5, &ExtractOptions::default())
            .await
            .unwrap();
        assert!(items.is_empty());
    }
}
