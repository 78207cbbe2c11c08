use std::sync::LazyLock;

use regex::Regex;

static DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+\.?\d*|\.\d+)$").unwrap());

/// Currency glyphs and prefixes seen on the supported sites. Longer
/// spellings come first so "Rs." is removed before "Rs".
const GLYPHS: &[&str] = &["₹", "Rs.", "Rs", "INR", "$", "€", "£"];

/// Parse a displayed price such as `"₹1,299"` or `"Rs. 2,499 47% off"`.
///
/// Thousands separators are stripped and currency glyphs become spaces, so
/// `"₹999₹1,999"` reads as two tokens. Only the first token is kept. Returns `None` unless that token is a
/// non-negative decimal.
pub fn parse_price(text: &str) -> Option<f64> {
    let mut cleaned = text.replace(',', "");
    for glyph in GLYPHS {
        cleaned = cleaned.replace(glyph, " ");
    }
    let token = cleaned.split_whitespace().next()?;
    if !DECIMAL_RE.is_match(token) {
        return None;
    }
    token.parse::<f64>().ok().filter(|p| p.is_finite())
}
