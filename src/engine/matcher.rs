use url::Url;

/// Extracts the host from a navigated url, stripping a leading `www.` label.
/// Returns [None] for urls without a meaningful host (about:blank, data urls,
/// garbage input).
pub fn normalize_host(raw_url: &str) -> Option<String> {
    let url = Url::parse(raw_url).ok()?;
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    Some(host.to_ascii_lowercase())
}

/// Resolves a normalized host to a registered site key. An exact match always
/// wins; otherwise the first registered key contained in the host is taken.
///
/// The containment fallback is what lets `mail.example.com` match a registered
/// `example.com`. It also knowingly accepts coincidental substrings (a
/// registered `b.com` matches `ab.com`) rather than parsing registrable
/// domains.
pub fn find_matching_site<'a>(
    host: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let mut fallback = None;
    for key in keys {
        if key == host {
            return Some(key);
        }
        if fallback.is_none() && host.contains(key) {
            fallback = Some(key);
        }
    }
    fallback
}
