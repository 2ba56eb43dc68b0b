//! Search URL construction and Atom feed parsing for the hub.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::trace;
use url::Url;

use crate::download::DownloadError;

/// Matches one `<entry>` element of an Atom feed.
#[allow(clippy::expect_used)]
static ENTRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<entry\b[^>]*>(.*?)</entry>").expect("entry regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<id>\s*([^<]+?)\s*</id>").expect("id regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<title\b[^>]*>\s*([^<]+?)\s*</title>").expect("title regex is valid") // Static pattern, safe to panic
});

/// Search filters shared by every page and day of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Hub base URL without trailing slash.
    pub hub: String,
    /// Product type, e.g. `L2__NO2___`.
    pub product: String,
    /// Platform name, e.g. `Sentinel-5`.
    pub platform: String,
    /// Processing mode, e.g. `Offline`.
    pub mode: String,
    /// Page size.
    pub rows: u32,
}

/// One product listed by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductEntry {
    /// Hub product identifier.
    pub id: String,
    /// Product title, used as the local file name.
    pub title: String,
}

/// Data and checksum URLs of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductUrls {
    /// Where the product content is served.
    pub data: String,
    /// Where the product's checksum is served as plain text.
    pub checksum: String,
}

/// Builds the search URL for products sensed on `date`, starting at result `start`.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] if the hub base URL does not parse.
pub fn build_search_url(
    query: &SearchQuery,
    date: NaiveDate,
    start: u32,
) -> Result<String, DownloadError> {
    let base = format!("{}/search", query.hub.trim_end_matches('/'));
    let mut url = Url::parse(&base).map_err(|_| DownloadError::invalid_url(&base))?;

    let day = date.format("%Y-%m-%d");
    let q = format!(
        "beginPosition:[{day}T00:00:00.000Z TO {day}T23:59:59.000Z] AND platformname:{} AND producttype:{} AND processingmode:{}",
        query.platform, query.product, query.mode
    );
    url.query_pairs_mut()
        .append_pair("q", &q)
        .append_pair("rows", &query.rows.to_string())
        .append_pair("start", &start.to_string());

    Ok(url.into())
}

/// Data and checksum URLs for product `id`.
#[must_use]
pub fn product_urls(hub: &str, id: &str) -> ProductUrls {
    let root = format!("{}/odata/v1/Products('{id}')", hub.trim_end_matches('/'));
    ProductUrls {
        data: format!("{root}/$value"),
        checksum: format!("{root}/Checksum/Value/$value"),
    }
}

/// Extracts the products from an Atom search response, sorted by title.
///
/// Entries without both an id and a title are skipped; the feed's own
/// `<id>` and `<title>` outside any entry are ignored.
#[must_use]
pub fn extract_products(atom_xml: &str) -> Vec<ProductEntry> {
    let mut products: Vec<ProductEntry> = ENTRY_PATTERN
        .captures_iter(atom_xml)
        .filter_map(|entry| {
            let body = entry.get(1)?.as_str();
            let id = ID_PATTERN.captures(body)?.get(1)?.as_str();
            let title = TITLE_PATTERN.captures(body)?.get(1)?.as_str();
            Some(ProductEntry {
                id: unescape_xml(id),
                title: unescape_xml(title),
            })
        })
        .collect();

    products.sort_by(|a, b| a.title.cmp(&b.title));
    trace!(count = products.len(), "parsed search entries");
    products
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/" xmlns="http://www.w3.org/2005/Atom">
<title>Sentinels Hub search results for: ...</title>
<id>https://hub.example/dhus/search?q=...</id>
<opensearch:totalResults>2</opensearch:totalResults>
<entry>
<title>S5P_OFFL_L2__NO2____20190102T030405</title>
<link href="https://hub.example/dhus/odata/v1/Products('bbbb')/$value"/>
<link rel="alternative" href="https://hub.example/dhus/odata/v1/Products('bbbb')/"/>
<id>bbbb-2222</id>
<str name="size">450.10 MB</str>
</entry>
<entry>
<title>S5P_OFFL_L2__NO2____20190102T010203</title>
<id>aaaa-1111</id>
</entry>
</feed>"#;

    fn query() -> SearchQuery {
        SearchQuery {
            hub: "https://hub.example/dhus/".to_string(),
            product: "L2__NO2___".to_string(),
            platform: "Sentinel-5".to_string(),
            mode: "Offline".to_string(),
            rows: 50,
        }
    }

    #[test]
    fn test_extract_products_sorted_by_title() {
        let products = extract_products(FEED);
        assert_eq!(
            products,
            vec![
                ProductEntry {
                    id: "aaaa-1111".to_string(),
                    title: "S5P_OFFL_L2__NO2____20190102T010203".to_string(),
                },
                ProductEntry {
                    id: "bbbb-2222".to_string(),
                    title: "S5P_OFFL_L2__NO2____20190102T030405".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_extract_products_empty_feed() {
        let feed = "<feed><title>none</title><id>x</id></feed>";
        assert!(extract_products(feed).is_empty());
    }

    #[test]
    fn test_build_search_url_covers_whole_day() {
        let date = NaiveDate::from_ymd_opt(2019, 1, 2).unwrap();
        let url = build_search_url(&query(), date, 50).unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/dhus/search");

        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        let q = &pairs.iter().find(|(k, _)| k == "q").unwrap().1;
        assert!(q.contains("beginPosition:[2019-01-02T00:00:00.000Z TO 2019-01-02T23:59:59.000Z]"));
        assert!(q.contains("producttype:L2__NO2___"));
        assert!(q.contains("platformname:Sentinel-5"));
        assert!(q.contains("processingmode:Offline"));
        assert!(pairs.contains(&("rows".to_string(), "50".to_string())));
        assert!(pairs.contains(&("start".to_string(), "50".to_string())));
    }

    #[test]
    fn test_build_search_url_rejects_bad_hub() {
        let mut bad = query();
        bad.hub = "not a url".to_string();
        let date = NaiveDate::from_ymd_opt(2019, 1, 2).unwrap();
        assert!(matches!(
            build_search_url(&bad, date, 0),
            Err(DownloadError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_product_urls() {
        let urls = product_urls("https://hub.example/dhus/", "abc");
        assert_eq!(urls.data, "https://hub.example/dhus/odata/v1/Products('abc')/$value");
        assert_eq!(
            urls.checksum,
            "https://hub.example/dhus/odata/v1/Products('abc')/Checksum/Value/$value"
        );
    }

    #[test]
    fn test_unescape_xml_entities() {
        assert_eq!(unescape_xml("a&amp;b&lt;c&gt;"), "a&b<c>");
    }
}
