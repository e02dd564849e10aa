use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating the service base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain http to a remote host would send identities in the clear.
    #[error("Plain http is only allowed for localhost, use https for {0}")]
    InsecureRemote(String),
    #[error("URL has no host")]
    MissingHost,
    /// Query strings and fragments would be clobbered by endpoint paths.
    #[error("Base URL must not carry a query or fragment")]
    UnexpectedSuffix,
}

/// Validates the API base URL from config or the command line.
///
/// Accepts `https://` anywhere and `http://` only for `localhost` and loopback
/// addresses. A trailing slash is added so endpoint paths append cleanly.
///
/// # Examples
///
/// ```
/// use marketfeed::util::validate_api_base;
///
/// let url = validate_api_base("http://localhost:8000").unwrap();
/// assert_eq!(url.as_str(), "http://localhost:8000/");
///
/// assert!(validate_api_base("https://api.example.com/v1").is_ok());
/// assert!(validate_api_base("http://api.example.com").is_err());
/// assert!(validate_api_base("file:///etc/passwd").is_err());
/// ```
pub fn validate_api_base(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    match url.scheme() {
        "https" => {}
        "http" if is_local_host(host) => {}
        "http" => return Err(UrlValidationError::InsecureRemote(host.to_owned())),
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedSuffix);
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
