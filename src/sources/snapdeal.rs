use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::browser::{BrowserSite, Locator, SearchPage};
use super::html::{absolutize, attr, select_text};
use super::{Harvest, Listing};
use crate::price::parse_price;
use crate::record::RawItem;

pub const ID: &str = "Snapdeal";

const HOME: &str = "https://www.snapdeal.com/";

static BASE_URL: LazyLock<Url> = LazyLock::new(|| Url::parse(HOME).unwrap());

static TUPLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.product-tuple-listing").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".product-title").unwrap());
static TITLE_FALLBACK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".product-desc-rating").unwrap());
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".product-price").unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());

pub struct Snapdeal;

impl BrowserSite for Snapdeal {
    fn id(&self) -> &'static str {
        ID
    }

    fn page(&self) -> SearchPage {
        SearchPage {
            home: HOME,
            dismiss: None,
            search_box: Locator::Css("#inputValEnter"),
            candidates: Locator::Css("div.product-tuple-listing"),
        }
    }

    fn parse(&self, html: &str, max_results: usize) -> Vec<RawItem> {
        parse_results(html, max_results)
    }
}

pub fn parse_results(html: &str, max_results: usize) -> Vec<RawItem> {
    let doc = Html::parse_document(html);
    let mut harvest = Harvest::new(ID, max_results);
    for tuple in doc.select(&TUPLE) {
        if harvest.is_full() {
            break;
        }
        match parse_tuple(tuple) {
            Ok(listing) => {
                harvest.push(listing);
            }
            Err(reason) => debug!("[{}] skip tuple: {}", ID, reason),
        }
    }
    harvest.finish()
}

fn parse_tuple(tuple: ElementRef<'_>) -> Result<Listing, &'static str> {
    let title = select_text(tuple, &TITLE)
        .or_else(|| select_text(tuple, &TITLE_FALLBACK))
        .ok_or("no title")?;
    let link = tuple
        .select(&LINK)
        .find_map(|a| attr(a, "href"))
        .and_then(|href| absolutize(&BASE_URL, href))
        .ok_or("no link")?;
    let price_text = select_text(tuple, &PRICE).ok_or("no price")?;
    let price = parse_price(&price_text).ok_or("unparsable price")?;

    Ok(Listing {
        title,
        price,
        link,
        image: image(tuple),
        extra: Vec::new(),
    })
}

/// Snapdeal lazy-loads thumbnails: `src` is often an inline placeholder and
/// the real URL sits in `data-src`.
fn image(tuple: ElementRef<'_>) -> Option<String> {
    let img = tuple.select(&IMAGE).next()?;
    attr(img, "src")
        .filter(|src| !src.starts_with("data:"))
        .or_else(|| attr(img, "data-src"))
        .map(str::to_string)
}
