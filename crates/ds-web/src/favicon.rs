use reqwest::Url;

const FAVICON_SERVICE: &str = "https://www.google.com/s2/favicons";

/// Favicon URL for the site hosting `url`, served by Google's s2 favicon
/// service. `None` when `url` has no host.
pub fn favicon_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}?domain={}&sz=32", FAVICON_SERVICE, host))
}
