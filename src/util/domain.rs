/// Domain and URL normalization.
use reqwest::Url;

const MULTI_LABEL_SECOND_PARTS: &[&str] = &["co", "com", "net", "org", "gov", "edu", "ac"];

/// Reduce a host (possibly with protocol, www, subdomains, or a path) to its
/// registrable domain. Multi-label TLDs like `co.uk` keep three labels.
#[must_use]
pub(crate) fn registrable_domain(input: &str) -> String {
    let mut domain = input
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .to_lowercase();
    if let Some(stripped) = domain.strip_prefix("www.") {
        domain = stripped.to_string();
    }
    if let Some((host, _)) = domain.split_once('/') {
        domain = host.to_string();
    }

    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() >= 3 {
        let second_to_last = parts[parts.len() - 2];
        if MULTI_LABEL_SECOND_PARTS.contains(&second_to_last) {
            return parts[parts.len() - 3..].join(".");
        }
        return parts[parts.len() - 2..].join(".");
    }

    domain
}

/// Leading label of the registrable domain, title-cased with dashes as
/// spaces. Used for fallback company names.
#[must_use]
pub(crate) fn domain_leading_label(input: &str) -> String {
    let primary = registrable_domain(input);
    let label = primary.split('.').next().unwrap_or(&primary);
    label
        .split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical scrape key: lowercase host without `www.`, fragment dropped,
/// trailing slash trimmed from the path.
#[must_use]
pub(crate) fn normalize_url(input: &str) -> Option<String> {
    let mut url = Url::parse(input.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_fragment(None);
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host)).ok()?;

    let mut normalized = url.to_string();
    if normalized.ends_with('/') && url.path() == "/" && url.query().is_none() {
        normalized.pop();
    }
    Some(normalized)
}

/// Host of a URL with `www.` stripped; empty string when unparseable.
#[must_use]
pub(crate) fn domain_of_url(input: &str) -> String {
    Url::parse(input)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
        .map(|host| host.strip_prefix("www.").unwrap_or(&host).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_protocol_www_and_path() {
        assert_eq!(
            registrable_domain("https://www.example.com/pricing"),
            "example.com"
        );
    }

    #[test]
    fn reduces_subdomains_to_registrable() {
        assert_eq!(registrable_domain("blog.vendor.io"), "vendor.io");
        assert_eq!(registrable_domain("a.b.c.vendor.io"), "vendor.io");
    }

    #[test]
    fn keeps_multi_label_tlds() {
        assert_eq!(registrable_domain("business.hsbc.co.uk"), "hsbc.co.uk");
        assert_eq!(registrable_domain("news.example.com.au"), "example.com.au");
        assert_eq!(registrable_domain("www.cam.ac.uk"), "cam.ac.uk");
    }

    #[test]
    fn leading_label_becomes_title_case() {
        assert_eq!(domain_leading_label("https://red-hat.com/x"), "Red Hat");
        assert_eq!(domain_leading_label("business.hsbc.co.uk"), "Hsbc");
    }

    #[test]
    fn normalize_url_drops_fragment_and_www() {
        assert_eq!(
            normalize_url("https://www.example.com/page#section").as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn normalize_url_trims_bare_root_slash() {
        assert_eq!(
            normalize_url("https://example.com/").as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn normalize_url_rejects_non_http() {
        assert!(normalize_url("ftp://example.com/file").is_none());
        assert!(normalize_url("not a url").is_none());
    }

    #[test]
    fn domain_of_url_handles_bad_input() {
        assert_eq!(domain_of_url("https://www.example.com/a"), "example.com");
        assert_eq!(domain_of_url("::"), "");
    }
}
