use url::Url;

/// Registered domain of a URL, lower case (`https://www.Forum.example.co.uk/x` → `example.co.uk`).
///
/// Suffixes come from the public suffix list. Hosts without a registrable
/// part (IP addresses, `localhost`, bare suffixes) are returned whole, and an
/// empty string when the URL has no host.
pub fn registered_domain(url: &str) -> String {
    let host = match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.to_lowercase(),
            None => return String::new(),
        },
        Err(_) => return String::new(),
    };

    let host = host.trim_end_matches('.');
    if host.starts_with('[') || host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }

    psl::domain_str(host).unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_domain() {
        assert_eq!(registered_domain("https://www.Example.com/path"), "example.com");
        assert_eq!(registered_domain("http://forum.example.co.uk/"), "example.co.uk");
        assert_eq!(registered_domain("https://example.com"), "example.com");
        assert_eq!(registered_domain("http://localhost:8080/"), "localhost");
        assert_eq!(registered_domain("http://127.0.0.1:3000/x"), "127.0.0.1");
        assert_eq!(registered_domain("not a url"), "");
    }

    #[test]
    fn test_multi_label_public_suffixes() {
        assert_eq!(registered_domain("http://forum.example.ne.jp/"), "example.ne.jp");
        assert_eq!(registered_domain("http://www.example.or.jp/"), "example.or.jp");
        assert_eq!(registered_domain("https://users.example.com.au/u/1"), "example.com.au");
        assert_eq!(registered_domain("https://blog.example.github.io/"), "example.github.io");
    }
}
