use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::browser::{BrowserSite, Locator, SearchPage};
use super::html::{absolutize, attr, closest, nearby_text_with_glyph, select_text, text_of, text_with_glyph};
use super::{Harvest, Listing};
use crate::price::parse_price;
use crate::record::RawItem;

pub const ID: &str = "JioMart";

const HOME: &str = "https://www.jiomart.com/";
const PRODUCT_LINKS: &str = "a[href*='/p/'], a[href*='/product/']";
const PRICE_GLYPHS: &[&str] = &["₹", "Rs"];
const PRICE_LEVELS: usize = 3;

static BASE_URL: LazyLock<Url> = LazyLock::new(|| Url::parse(HOME).unwrap());

static PRODUCT_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse(PRODUCT_LINKS).unwrap());
static DETAILS: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".plp-card-details").unwrap());
static NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".plp-card-details-name").unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());

pub struct JioMart;

impl BrowserSite for JioMart {
    fn id(&self) -> &'static str {
        ID
    }

    fn page(&self) -> SearchPage {
        SearchPage {
            home: HOME,
            dismiss: None,
            search_box: Locator::Css("#autocomplete-0-input"),
            candidates: Locator::Css(PRODUCT_LINKS),
        }
    }

    fn parse(&self, html: &str, max_results: usize) -> Vec<RawItem> {
        parse_results(html, max_results)
    }
}

pub fn parse_results(html: &str, max_results: usize) -> Vec<RawItem> {
    let doc = Html::parse_document(html);
    let mut harvest = Harvest::new(ID, max_results);
    for anchor in doc.select(&PRODUCT_LINK) {
        if harvest.is_full() {
            break;
        }
        match parse_anchor(anchor) {
            Ok(listing) => {
                harvest.push(listing);
            }
            Err(reason) => debug!("[{}] skip anchor: {}", ID, reason),
        }
    }
    harvest.finish()
}

fn parse_anchor(anchor: ElementRef<'_>) -> Result<Listing, &'static str> {
    // Card-wrapping anchors carry a name block; bare title links are all text.
    let title = select_text(anchor, &NAME).unwrap_or_else(|| text_of(anchor));
    if title.is_empty() {
        return Err("no title");
    }
    let link = attr(anchor, "href")
        .and_then(|href| absolutize(&BASE_URL, href))
        .ok_or("no link")?;
    let price_text = price_text(anchor).ok_or("no price")?;
    let price = parse_price(&price_text).ok_or("unparsable price")?;
    let image = anchor
        .select(&IMAGE)
        .find_map(|img| attr(img, "src"))
        .map(str::to_string);

    Ok(Listing {
        title,
        price,
        link,
        image,
        extra: Vec::new(),
    })
}

fn price_text(anchor: ElementRef<'_>) -> Option<String> {
    closest(anchor, &DETAILS)
        .and_then(|details| text_with_glyph(details, PRICE_GLYPHS))
        .or_else(|| {
            anchor
                .select(&DETAILS)
                .find_map(|details| text_with_glyph(details, PRICE_GLYPHS))
        })
        .or_else(|| nearby_text_with_glyph(anchor, PRICE_GLYPHS, PRICE_LEVELS))
}
