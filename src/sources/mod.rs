pub mod amazon;
pub mod browser;
pub mod flipkart;
pub mod html;
pub mod http;
pub mod jiomart;
pub mod snapdeal;
#[cfg(test)]
mod test_server;
pub mod webdriver;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::record::RawItem;
use browser::{Browser, BrowserExtractor};
use webdriver::WebDriver;

/// Per-call knobs shared by every extractor.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub headless: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { headless: true }
    }
}

/// One shop's search-results scraper.
///
/// Implementations return at most `max_results` items. Setup problems such as
/// a search field that never appears end in `Ok(vec![])`; errors are left for
/// failures the caller should log as a source failure.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn id(&self) -> &'static str;

    async fn extract(
        &self,
        query: &str,
        max_results: usize,
        options: &ExtractOptions,
    ) -> Result<Vec<RawItem>>;
}

pub enum Binding {
    Available(Arc<dyn Extractor>),
    /// The extractor could not be constructed at all.
    Unavailable(String),
}

pub struct SourceEntry {
    pub id: String,
    pub binding: Binding,
}

/// Ordered set of configured sources. Order is the merge order.
#[derive(Default)]
pub struct Registry {
    entries: Vec<SourceEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amazon, Flipkart, JioMart, Snapdeal, in that order.
    pub fn standard(settings: &Settings) -> Self {
        let mut registry = Self::new();
        registry.register(amazon::ID, || {
            Ok(Arc::new(amazon::Amazon::new(settings)?) as Arc<dyn Extractor>)
        });

        let browser: Result<Arc<dyn Browser>> = WebDriver::new(&settings.webdriver_url)
            .map(|w| Arc::new(w) as Arc<dyn Browser>)
            .map_err(anyhow::Error::from);
        registry.register(flipkart::ID, || browser_source(&browser, flipkart::Flipkart));
        registry.register(jiomart::ID, || browser_source(&browser, jiomart::JioMart));
        registry.register(snapdeal::ID, || browser_source(&browser, snapdeal::Snapdeal));
        registry
    }

    /// Build and add a source. A failing constructor leaves the source
    /// registered but unavailable.
    pub fn register<F>(&mut self, id: &str, build: F) -> &mut Self
    where
        F: FnOnce() -> Result<Arc<dyn Extractor>>,
    {
        let binding = match build() {
            Ok(extractor) => Binding::Available(extractor),
            Err(e) => {
                warn!("[{}] extractor unavailable: {:#}", id, e);
                Binding::Unavailable(format!("{:#}", e))
            }
        };
        self.entries.push(SourceEntry {
            id: id.to_string(),
            binding,
        });
        self
    }

    pub fn add(&mut self, extractor: Arc<dyn Extractor>) -> &mut Self {
        self.entries.push(SourceEntry {
            id: extractor.id().to_string(),
            binding: Binding::Available(extractor),
        });
        self
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Entries enabled by `filter`, in registry order. `None` enables all.
    pub fn enabled<'a>(&'a self, filter: Option<&[String]>) -> Vec<&'a SourceEntry> {
        let Some(wanted) = filter else {
            return self.entries.iter().collect();
        };
        for name in wanted {
            if !self.ids().any(|id| id.eq_ignore_ascii_case(name)) {
                let known: Vec<&str> = self.ids().collect();
                warn!("Unknown source '{}' in filter (known: {})", name, known.join(", "));
            }
        }
        self.entries
            .iter()
            .filter(|e| wanted.iter().any(|w| w.eq_ignore_ascii_case(&e.id)))
            .collect()
    }
}

fn browser_source<S>(browser: &Result<Arc<dyn Browser>>, site: S) -> Result<Arc<dyn Extractor>>
where
    S: browser::BrowserSite + 'static,
{
    match browser {
        Ok(b) => Ok(Arc::new(BrowserExtractor::new(site, Arc::clone(b)))),
        Err(e) => Err(anyhow::anyhow!("browser capability unavailable: {:#}", e)),
    }
}

/// Collects items for one extractor pass: first title wins, stops at the cap.
pub struct Harvest {
    source: &'static str,
    max: usize,
    seen_titles: HashSet<String>,
    items: Vec<RawItem>,
}

impl Harvest {
    pub fn new(source: &'static str, max: usize) -> Self {
        Self {
            source,
            max,
            seen_titles: HashSet::new(),
            items: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max
    }

    /// Whether `title` was already taken in this pass.
    pub fn has_title(&self, title: &str) -> bool {
        self.seen_titles.contains(title)
    }

    /// Add a listing. Returns false when it was a duplicate or the cap was
    /// already reached.
    pub fn push(&mut self, listing: Listing) -> bool {
        if self.is_full() || self.has_title(&listing.title) {
            debug!("[{}] skip duplicate or overflow: {}", self.source, listing.title);
            return false;
        }
        self.seen_titles.insert(listing.title.clone());
        self.items.push(listing.into_raw(self.source));
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn finish(self) -> Vec<RawItem> {
        self.items
    }
}

/// Fields every extractor pulls out of a product card.
#[derive(Debug, Clone)]
pub struct Listing {
    pub title: String,
    pub price: f64,
    pub link: String,
    pub image: Option<String>,
    /// Site-specific extras, passed through untouched.
    pub extra: Vec<(&'static str, Value)>,
}

impl Listing {
    fn into_raw(self, source: &str) -> RawItem {
        let mut item = RawItem::new();
        item.insert("title".into(), Value::String(self.title));
        item.insert("price".into(), Value::from(self.price));
        item.insert("link".into(), Value::String(self.link));
        item.insert(
            "image".into(),
            self.image.map(Value::String).unwrap_or(Value::Null),
        );
        item.insert("source".into(), Value::String(source.to_string()));
        for (key, value) in self.extra {
            item.insert(key.to_string(), value);
        }
        item
    }
}
