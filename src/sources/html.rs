use scraper::{ElementRef, Selector};
use url::Url;

/// Visible text of an element with whitespace runs collapsed.
pub fn text_of(el: ElementRef<'_>) -> String {
    collapse(el.text())
}

pub fn collapse<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First descendant matching `selector`, as trimmed non-empty text.
pub fn select_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(text_of)
        .find(|t| !t.is_empty())
}

/// Attribute value, ignoring empty strings.
pub fn attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a possibly relative `href` against the page URL.
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(String::from)
}

/// Nearest ancestor (not including `el`) matching `selector`.
pub fn closest<'a>(el: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| selector.matches(a))
}

/// Full text of the first element under `scope` whose own text contains one
/// of `glyphs`. Mirrors `//*[contains(text(), '₹')]`.
pub fn text_with_glyph(scope: ElementRef<'_>, glyphs: &[&str]) -> Option<String> {
    scope.descendants().find_map(|node| {
        let text = node.value().as_text()?;
        if !glyphs.iter().any(|g| text.contains(g)) {
            return None;
        }
        let owner = node.parent().and_then(ElementRef::wrap)?;
        Some(text_of(owner))
    })
}

/// Walk up to `levels` ancestors of `el` looking for price-like text.
pub fn nearby_text_with_glyph(el: ElementRef<'_>, glyphs: &[&str], levels: usize) -> Option<String> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .take(levels)
        .find_map(|scope| text_with_glyph(scope, glyphs))
}
