use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::html::{absolutize, attr, select_text};
use super::http::{FetchError, HttpFetcher};
use super::{ExtractOptions, Extractor, Harvest, Listing};
use crate::config::Settings;
use crate::price::parse_price;
use crate::record::RawItem;

pub const ID: &str = "Amazon";

static BASE_URL: LazyLock<Url> = LazyLock::new(|| Url::parse("https://www.amazon.in/").unwrap());

static CARD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.s-result-item[data-component-type='s-search-result']").unwrap()
});
static NAME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2 span").unwrap());
static PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.a-price-whole").unwrap());
static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.a-link-normal.s-no-outline").unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img.s-image").unwrap());
static RATING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.a-icon-alt").unwrap());

/// amazon.in search results. Server-rendered, so a plain GET is enough.
pub struct Amazon {
    fetcher: HttpFetcher,
    base: Url,
}

impl Amazon {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self::with_fetcher(HttpFetcher::new(settings)?, BASE_URL.clone()))
    }

    /// Search against `base` instead of amazon.in (mirrors, local servers).
    pub fn with_fetcher(fetcher: HttpFetcher, base: Url) -> Self {
        Self { fetcher, base }
    }
}

pub fn search_url(base: &Url, query: &str) -> String {
    let mut url = base.join("s").unwrap_or_else(|_| base.clone());
    url.query_pairs_mut().append_pair("k", query);
    url.into()
}

#[async_trait]
impl Extractor for Amazon {
    fn id(&self) -> &'static str {
        ID
    }

    async fn extract(
        &self,
        query: &str,
        max_results: usize,
        _options: &ExtractOptions,
    ) -> Result<Vec<RawItem>> {
        let url = search_url(&self.base, query);
        let html = match self.fetcher.get_text(&url).await {
            Ok(html) => html,
            Err(FetchError::Status(status)) => {
                warn!("[{}] returned status {}", ID, status);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let items = parse_results(&html, max_results);
        info!("[{}] Parsed {} unique products.", ID, items.len());
        Ok(items)
    }
}

pub fn parse_results(html: &str, max_results: usize) -> Vec<RawItem> {
    let doc = Html::parse_document(html);
    let mut harvest = Harvest::new(ID, max_results);
    for card in doc.select(&CARD) {
        if harvest.is_full() {
            break;
        }
        match parse_card(card) {
            Ok(listing) => {
                harvest.push(listing);
            }
            Err(reason) => debug!("[{}] skip product: {}", ID, reason),
        }
    }
    harvest.finish()
}

fn parse_card(card: ElementRef<'_>) -> Result<Listing, &'static str> {
    let title = select_text(card, &NAME).ok_or("no title")?;
    let price_text = select_text(card, &PRICE).ok_or("no price")?;
    let href = card
        .select(&LINK)
        .find_map(|a| attr(a, "href"))
        .ok_or("no link")?;
    let price = parse_price(&price_text).ok_or("unparsable price")?;
    let link = absolutize(&BASE_URL, href).ok_or("bad link")?;
    let image = card
        .select(&IMAGE)
        .find_map(|img| attr(img, "src"))
        .map(str::to_string);
    let rating = select_text(card, &RATING).unwrap_or_else(|| "N/A".to_string());

    Ok(Listing {
        title,
        price,
        link,
        image,
        extra: vec![("rating", Value::String(rating))],
    })
}
