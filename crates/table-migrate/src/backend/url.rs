//! `tag:::locator` endpoint URLs.

use std::fmt;
use std::str::FromStr;

use crate::drivers::redact;
use crate::error::{MigrateError, Result};

/// Separator between the backend tag and its locator.
pub const URL_DELIMITER: &str = ":::";

/// A parsed endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    /// Backend tag, trimmed.
    pub tag: String,
    /// Everything after the first delimiter, passed to the backend unchanged.
    pub locator: String,
}

impl EndpointUrl {
    /// Split `url` on the first `:::`.
    pub fn parse(url: &str) -> Result<Self> {
        let Some((tag, locator)) = url.split_once(URL_DELIMITER) else {
            return Err(MigrateError::Config(format!(
                "Invalid endpoint '{}': expected <backend>{}<locator>",
                redact(url),
                URL_DELIMITER
            )));
        };
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(MigrateError::Config(format!(
                "Invalid endpoint '{}': missing backend tag",
                redact(url)
            )));
        }
        Ok(Self {
            tag: tag.to_string(),
            locator: locator.to_string(),
        })
    }
}

impl FromStr for EndpointUrl {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.tag, URL_DELIMITER, redact(&self.locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_delimiter() {
        let url = EndpointUrl::parse(" dbms :::creator://DSN=x;PWD=a:::b").unwrap();
        assert_eq!(url.tag, "dbms");
        assert_eq!(url.locator, "creator://DSN=x;PWD=a:::b");
    }

    #[test]
    fn test_parse_keeps_locator_verbatim() {
        let url: EndpointUrl = "jsonfile:::/tmp/out dir/".parse().unwrap();
        assert_eq!(url.tag, "jsonfile");
        assert_eq!(url.locator, "/tmp/out dir/");
    }

    #[test]
    fn test_parse_rejects_missing_delimiter_or_tag() {
        assert!(matches!(
            EndpointUrl::parse("sqlite:///tmp/a.db"),
            Err(MigrateError::Config(_))
        ));
        assert!(matches!(
            EndpointUrl::parse("  :::sqlite:a.db"),
            Err(MigrateError::Config(_))
        ));
    }

    #[test]
    fn test_display_hides_password() {
        let url = EndpointUrl::parse("dbms:::postgres://u:secret@h/db").unwrap();
        assert_eq!(url.to_string(), "dbms:::postgres://u:***@h/db");
    }
}
