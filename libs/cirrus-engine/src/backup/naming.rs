use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::error::EngineError;

/// Naming of dated backup target accounts: `{prefix}{d}{YYYY}{d}{MM}{d}{DD}`.
///
/// The delimiter `d` is empty unless configured, which gives the compact
/// `bkp20240131` form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetNaming {
    pub prefix: String,
    #[serde(default)]
    pub delimiter: String,
}

/// A target account name taken apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTargetDescriptor {
    pub account_name: String,
    pub created_date: NaiveDate,
}

impl TargetNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: String::new(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.prefix.is_empty() {
            return Err(EngineError::Config("backup naming prefix must not be empty".into()));
        }
        if self.delimiter.chars().any(|c| c.is_ascii_digit()) {
            return Err(EngineError::Config(format!(
                "backup naming delimiter '{}' must not contain digits",
                self.delimiter
            )));
        }
        Ok(())
    }

    /// Name of the account created on `date`. Years outside `0..=9999` do not
    /// fit the four-digit year token and are rejected.
    pub fn format(&self, date: NaiveDate) -> Result<String, EngineError> {
        if !(0..=9999).contains(&date.year()) {
            return Err(EngineError::naming(
                &date.to_string(),
                "year does not fit in four digits",
            ));
        }
        let d = &self.delimiter;
        Ok(format!(
            "{}{d}{:04}{d}{:02}{d}{:02}",
            self.prefix,
            date.year(),
            date.month(),
            date.day()
        ))
    }

    /// Inverse of [`format`](Self::format). Anything that is not exactly
    /// prefix, year, month and day is rejected.
    pub fn parse(&self, name: &str) -> Result<BackupTargetDescriptor, EngineError> {
        let rest = name
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| EngineError::naming(name, format!("expected prefix '{}'", self.prefix)))?;

        let tokens: Vec<&str> = if self.delimiter.is_empty() {
            if rest.len() != 8 || !rest.is_ascii() {
                return Err(EngineError::naming(name, "expected 8 date digits after the prefix"));
            }
            vec![&rest[..4], &rest[4..6], &rest[6..]]
        } else {
            let rest = rest
                .strip_prefix(self.delimiter.as_str())
                .ok_or_else(|| EngineError::naming(name, "missing delimiter after the prefix"))?;
            rest.split(self.delimiter.as_str()).collect()
        };

        if tokens.len() != 3 {
            return Err(EngineError::naming(
                name,
                format!("expected 4 tokens, found {}", tokens.len() + 1),
            ));
        }

        let year = date_token(name, tokens[0], 4, "year")?;
        let month = date_token(name, tokens[1], 2, "month")?;
        let day = date_token(name, tokens[2], 2, "day")?;

        let created_date = NaiveDate::from_ymd_opt(year as i32, month, day)
            .ok_or_else(|| EngineError::naming(name, format!("{year:04}-{month:02}-{day:02} is not a calendar date")))?;

        Ok(BackupTargetDescriptor {
            account_name: name.to_string(),
            created_date,
        })
    }
}

fn date_token(name: &str, token: &str, width: usize, what: &str) -> Result<u32, EngineError> {
    if token.len() != width || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::naming(
            name,
            format!("{what} '{token}' must be exactly {width} digits"),
        ));
    }
    token
        .parse()
        .map_err(|_| EngineError::naming(name, format!("{what} '{token}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn compact_format_is_bit_exact() {
        let naming = TargetNaming::new("bkp");
        assert_eq!(naming.format(date(2024, 1, 5)).unwrap(), "bkp20240105");
    }

    #[test]
    fn round_trips() {
        for naming in [TargetNaming::new("bkp"), TargetNaming::new("backup").with_delimiter("-")] {
            for d in [date(2024, 1, 5), date(2024, 2, 29), date(1999, 12, 31)] {
                let name = naming.format(d).unwrap();
                let parsed = naming.parse(&name).unwrap();
                assert_eq!(parsed.created_date, d, "{name}");
                assert_eq!(parsed.account_name, name);
            }
        }
        assert_eq!(
            TargetNaming::new("backup").with_delimiter("-").format(date(2024, 3, 1)).unwrap(),
            "backup-2024-03-01"
        );
    }

    #[test]
    fn rejects_malformed_names() {
        let compact = TargetNaming::new("bkp");
        for bad in ["other20240105", "bkp2024010", "bkp202401055", "bkp2024o105", "bkp20240230", "bkp20241301"] {
            assert!(matches!(compact.parse(bad), Err(EngineError::Naming { .. })), "{bad}");
        }

        let dashed = TargetNaming::new("bkp").with_delimiter("-");
        for bad in ["bkp-2024-01", "bkp-2024-01-05-1", "bkp2024-01-05", "bkp-24-01-05", "bkp-2024-1-05", "bkp-2024-+1-05"] {
            assert!(matches!(dashed.parse(bad), Err(EngineError::Naming { .. })), "{bad}");
        }
    }

    #[test]
    fn years_beyond_four_digits_are_rejected() {
        let naming = TargetNaming::new("bkp");
        assert_eq!(naming.format(date(9999, 12, 31)).unwrap(), "bkp99991231");
        assert!(matches!(naming.format(date(10_000, 1, 1)), Err(EngineError::Naming { .. })));
        assert!(matches!(naming.format(date(-1, 1, 1)), Err(EngineError::Naming { .. })));
    }

    #[test]
    fn validation() {
        assert!(TargetNaming::new("bkp").validate().is_ok());
        assert!(TargetNaming::new("").validate().is_err());
        assert!(TargetNaming::new("bkp").with_delimiter("0").validate().is_err());
    }
}
