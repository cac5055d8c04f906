//! Per-schedule retention policies.
//!
//! Each schedule is described by a YAML document stored in the cluster:
//!
//! ```yaml
//! name: daily
//! kanisterNamespace: kanister
//! blueprintName: pg-blueprint
//! profileName: s3-profile
//! retention:
//!   backups: 7
//!   days: "7"
//!   hours: 12.5
//! ```
//!
//! Retention fields accept integers, floats (truncated toward zero) and
//! numeric strings. Absent fields are zero. Negative values are rejected.

use crate::{Error, Result};
use chrono::{DateTime, Days, Duration, Months, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// Retention policy for one backup schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Schedule name; matches a backup's `backup-schedule` option.
    pub name: String,
    /// Namespace holding the schedule's `ActionSet`s.
    pub namespace: String,
    /// Blueprint used by deletion requests.
    pub blueprint_ref: String,
    /// Location profile used by deletion requests; empty means none.
    pub profile_ref: String,
    /// How many in-use backups to keep.
    pub max_backups: u32,
    /// How far back a backup may have been created and still count.
    pub max_age: MaxAge,
}

impl RetentionConfig {
    /// Creates a policy that keeps nothing, with no age window.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            blueprint_ref: String::new(),
            profile_ref: String::new(),
            max_backups: 0,
            max_age: MaxAge::default(),
        }
    }

    /// Sets the blueprint.
    #[must_use]
    pub fn with_blueprint(mut self, blueprint: impl Into<String>) -> Self {
        self.blueprint_ref = blueprint.into();
        self
    }

    /// Sets the profile.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile_ref = profile.into();
        self
    }

    /// Sets the retention count.
    #[must_use]
    pub const fn with_max_backups(mut self, max_backups: u32) -> Self {
        self.max_backups = max_backups;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.max_age = max_age;
        self
    }

    /// Oldest creation instant (exclusive) that still counts as in use.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.max_age.cutoff(now)
    }

    /// Parses a YAML retention document.
    ///
    /// `source_name` identifies the document in errors, e.g. the configmap name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the YAML is malformed, a retention
    /// field cannot be coerced to a non-negative integer, or `name` or
    /// `kanisterNamespace` is empty.
    pub fn from_yaml(source_name: &str, yaml: &str) -> Result<Self> {
        let parse_error = |cause: String| Error::ConfigParse {
            source_name: source_name.to_string(),
            cause,
        };

        let doc: RetentionDocument =
            serde_yaml_ng::from_str(yaml).map_err(|e| parse_error(e.to_string()))?;

        let name = doc.name.unwrap_or_default().trim().to_string();
        if name.is_empty() {
            return Err(parse_error("'name' is required".to_string()));
        }
        let namespace = doc.kanister_namespace.unwrap_or_default().trim().to_string();
        if namespace.is_empty() {
            return Err(parse_error("'kanisterNamespace' is required".to_string()));
        }

        let retention = doc.retention;
        let config = Self {
            name,
            namespace,
            blueprint_ref: doc.blueprint_name.unwrap_or_default(),
            profile_ref: doc.profile_name.unwrap_or_default(),
            max_backups: retention.backups.0,
            max_age: MaxAge {
                minutes: retention.minutes.0,
                hours: retention.hours.0,
                days: retention.days.0,
                months: retention.months.0,
                years: retention.years.0,
            },
        };

        if config.blueprint_ref.is_empty() {
            tracing::warn!(
                schedule = %config.name,
                source = source_name,
                "Retention config has no blueprintName; deletions will fail"
            );
        }

        tracing::info!(
            schedule = %config.name,
            namespace = %config.namespace,
            blueprint = %config.blueprint_ref,
            profile = %config.profile_ref,
            max_backups = config.max_backups,
            max_age = %config.max_age,
            "Loaded retention config"
        );

        Ok(config)
    }
}

/// Rejects duplicate schedule names across loaded documents.
///
/// # Errors
///
/// Returns [`Error::ConfigParse`] naming the first duplicate.
pub fn ensure_unique_names(configs: &[RetentionConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for config in configs {
        if !seen.insert(config.name.as_str()) {
            return Err(Error::ConfigParse {
                source_name: config.name.clone(),
                cause: format!("schedule '{}' is configured more than once", config.name),
            });
        }
    }
    Ok(())
}

/// Retention window, as independent calendar components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxAge {
    /// Minutes.
    pub minutes: u32,
    /// Hours.
    pub hours: u32,
    /// Days.
    pub days: u32,
    /// Months.
    pub months: u32,
    /// Years.
    pub years: u32,
}

impl MaxAge {
    /// A window of whole days.
    #[must_use]
    pub const fn days(days: u32) -> Self {
        Self {
            minutes: 0,
            hours: 0,
            days,
            months: 0,
            years: 0,
        }
    }

    /// Computes the cutoff instant relative to `now`.
    ///
    /// Minutes and hours are subtracted as fixed durations, then years and
    /// months as calendar months (clamping to the end of shorter months),
    /// then days as calendar days. A window that reaches past the
    /// representable range saturates at the minimum timestamp.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let fixed = Duration::minutes(i64::from(self.minutes)) + Duration::hours(i64::from(self.hours));
        let months = self.years.saturating_mul(12).saturating_add(self.months);

        now.checked_sub_signed(fixed)
            .and_then(|t| t.checked_sub_months(Months::new(months)))
            .and_then(|t| t.checked_sub_days(Days::new(u64::from(self.days))))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for MaxAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}y{}mo{}d{}h{}m",
            self.years, self.months, self.days, self.hours, self.minutes
        )
    }
}

/// Raw YAML retention document.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RetentionDocument {
    name: Option<String>,
    kanister_namespace: Option<String>,
    blueprint_name: Option<String>,
    profile_name: Option<String>,
    #[serde(default)]
    retention: RetentionSection,
}

/// Raw `retention:` section.
#[derive(Debug, Deserialize, Default)]
struct RetentionSection {
    #[serde(default)]
    backups: Count,
    #[serde(default)]
    minutes: Count,
    #[serde(default)]
    hours: Count,
    #[serde(default)]
    days: Count,
    #[serde(default)]
    months: Count,
    #[serde(default)]
    years: Count,
}

/// A non-negative integer decoded from an int, float or numeric string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCount")]
struct Count(u32);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCount {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawCount> for Count {
    type Error = String;

    #[allow(clippy::cast_possible_truncation)]
    fn try_from(raw: RawCount) -> std::result::Result<Self, Self::Error> {
        let value = match raw {
            RawCount::Int(v) => v,
            RawCount::Float(v) if v.is_finite() => v.trunc() as i64,
            RawCount::Float(v) => return Err(format!("{v} is not a finite number")),
            RawCount::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("'{s}' is not an integer: {e}"))?,
        };
        u32::try_from(value)
            .map(Self)
            .map_err(|_| format!("{value} is out of range (expected 0..={})", u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn doc(retention: &str) -> String {
        format!(
            "name: daily\nkanisterNamespace: kanister\nblueprintName: pg\nprofileName: s3\nretention:\n{retention}"
        )
    }

    #[test]
    fn test_full_document() {
        let config =
            RetentionConfig::from_yaml("cm/daily", &doc("  backups: 7\n  days: 7\n  hours: 1\n"))
                .expect("parses");
        assert_eq!(config.name, "daily");
        assert_eq!(config.namespace, "kanister");
        assert_eq!(config.blueprint_ref, "pg");
        assert_eq!(config.profile_ref, "s3");
        assert_eq!(config.max_backups, 7);
        assert_eq!(config.max_age.days, 7);
        assert_eq!(config.max_age.hours, 1);
        assert_eq!(config.max_age.months, 0);
    }

    #[test_case("  backups: 5\n", 5; "integer")]
    #[test_case("  backups: \"5\"\n", 5; "string")]
    #[test_case("  backups: \" 12 \"\n", 12; "string with whitespace")]
    #[test_case("  backups: 5.9\n", 5; "float truncates")]
    #[test_case("  days: 1\n", 0; "absent is zero")]
    fn test_count_coercion(retention: &str, expected: u32) {
        let config = RetentionConfig::from_yaml("cm", &doc(retention)).expect("parses");
        assert_eq!(config.max_backups, expected);
    }

    #[test_case("  backups: seven\n"; "non numeric string")]
    #[test_case("  backups: -1\n"; "negative")]
    #[test_case("  backups: \"-3\"\n"; "negative string")]
    #[test_case("  backups: [1]\n"; "sequence")]
    fn test_count_rejected(retention: &str) {
        let err = RetentionConfig::from_yaml("cm/bad", &doc(retention)).expect_err("rejected");
        assert!(matches!(err, Error::ConfigParse { ref source_name, .. } if source_name == "cm/bad"));
    }

    #[test]
    fn test_required_fields() {
        let err = RetentionConfig::from_yaml("cm", "kanisterNamespace: k\n").expect_err("no name");
        assert!(err.to_string().contains("'name' is required"));

        let err = RetentionConfig::from_yaml("cm", "name: daily\n").expect_err("no namespace");
        assert!(err.to_string().contains("'kanisterNamespace' is required"));
    }

    #[test]
    fn test_missing_profile_is_empty() {
        let config =
            RetentionConfig::from_yaml("cm", "name: d\nkanisterNamespace: k\nblueprintName: b\n")
                .expect("parses");
        assert!(config.profile_ref.is_empty());
        assert_eq!(config.max_backups, 0);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let configs = vec![
            RetentionConfig::new("daily", "k"),
            RetentionConfig::new("weekly", "k"),
            RetentionConfig::new("daily", "other"),
        ];
        let err = ensure_unique_names(&configs).expect_err("duplicate");
        assert!(err.to_string().contains("'daily'"));
        assert!(ensure_unique_names(&configs[..2]).is_ok());
    }

    #[test]
    fn test_cutoff_combines_components() {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 30, 0).unwrap();
        let age = MaxAge {
            minutes: 30,
            hours: 2,
            days: 3,
            months: 1,
            years: 1,
        };
        assert_eq!(
            age.cutoff(now),
            Utc.with_ymd_and_hms(2023, 4, 17, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_cutoff_clamps_month_end() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        let age = MaxAge {
            months: 1,
            ..MaxAge::default()
        };
        assert_eq!(age.cutoff(now), Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_zero_age_cutoff_is_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(MaxAge::default().cutoff(now), now);
    }

    #[test]
    fn test_huge_age_saturates() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let age = MaxAge {
            years: u32::MAX,
            ..MaxAge::default()
        };
        assert_eq!(age.cutoff(now), DateTime::<Utc>::MIN_UTC);
    }
}
