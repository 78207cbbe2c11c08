use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::browser::{BrowserSite, Locator, SearchPage};
use super::html::{absolutize, attr, closest, nearby_text_with_glyph, text_of, text_with_glyph};
use super::{Harvest, Listing};
use crate::price::parse_price;
use crate::record::RawItem;

pub const ID: &str = "Flipkart";

const HOME: &str = "https://www.flipkart.com/";
const RUPEE: &[&str] = &["₹"];
const PRICE_LEVELS: usize = 3;

static BASE_URL: LazyLock<Url> = LazyLock::new(|| Url::parse(HOME).unwrap());

static PRODUCT_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href*='/p/']").unwrap());
// Grid and list layouts wrap each product in a div carrying `data-id`.
static CARD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div[data-id]").unwrap());
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());

/// flipkart.com, rendered client-side so it is driven through a browser.
pub struct Flipkart;

impl BrowserSite for Flipkart {
    fn id(&self) -> &'static str {
        ID
    }

    fn page(&self) -> SearchPage {
        SearchPage {
            home: HOME,
            dismiss: Some(Locator::XPath("//button[text()='✕']")),
            search_box: Locator::Css("input[name='q']"),
            candidates: Locator::Css("a[href*='/p/']"),
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
    let title = text_of(anchor);
    if title.is_empty() {
        return Err("no title");
    }
    let link = attr(anchor, "href")
        .and_then(|href| absolutize(&BASE_URL, href))
        .ok_or("no link")?;
    let card = closest(anchor, &CARD);
    let price_text = card
        .and_then(|c| text_with_glyph(c, RUPEE))
        .or_else(|| nearby_text_with_glyph(anchor, RUPEE, PRICE_LEVELS))
        .ok_or("no price")?;
    let price = parse_price(&price_text).ok_or("unparsable price")?;
    let image = first_image(anchor)
        .or_else(|| card.and_then(first_image))
        .map(str::to_string);

    Ok(Listing {
        title,
        price,
        link,
        image,
        extra: Vec::new(),
    })
}

fn first_image(scope: ElementRef<'_>) -> Option<&str> {
    scope.select(&IMAGE).find_map(|img| attr(img, "src"))
}
