use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error};

use crate::error::AppError;

/// Parse `name:value` strings into a header map.
///
/// The value is split at the first `:` and trimmed; repeated names are kept
/// as separate entries.
pub fn parse_headers(headers: &[String]) -> Result<HeaderMap, AppError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for header in headers {
        let Some((name, value)) = header.split_once(':') else {
            error!("Invalid header format: {header}");
            return Err(AppError::InvalidInput(format!(
                "Invalid header format: {header} (expected name:value)"
            )));
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header name in {header}: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header value in {header}: {e}")))?;
        debug!("Added header: {name}");
        map.append(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_headers() {
        let map = parse_headers(&strings(&["Referer: http://example.com/a", "X-Token:abc"])).unwrap();
        assert_eq!(map.get("referer").unwrap(), "http://example.com/a");
        assert_eq!(map.get("x-token").unwrap(), "abc");
    }

    #[test]
    fn test_value_keeps_later_colons() {
        let map = parse_headers(&strings(&["Origin: https://example.com:8443"])).unwrap();
        assert_eq!(map.get("origin").unwrap(), "https://example.com:8443");
    }

    #[test]
    fn test_repeated_names_are_kept() {
        let map = parse_headers(&strings(&["Cookie: a=1", "Cookie: b=2"])).unwrap();
        assert_eq!(map.get_all("cookie").iter().count(), 2);
    }

    #[test]
    fn test_missing_separator() {
        let err = parse_headers(&strings(&["no-separator"])).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_name() {
        assert!(parse_headers(&strings(&["bad name: x"])).is_err());
    }
}
