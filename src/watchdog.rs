//! SAS token expiry watchdog.
//!
//! An ad-hoc SAS token carries its expiry in the `se` query parameter.
//! Once a day the watchdog compares it with today's date and, on the
//! configured days before expiry, produces a notification for the site
//! administrators.  Tokens bound to a stored access policy have no `se`
//! and are never checked.

use chrono::NaiveDate;
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

use crate::config::{WatchdogConfig, DEFAULT_WARN_ON_DAYS};
use crate::errors::WatchdogError;

/// Who a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Admins,
}

/// A private system message for the administrators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotification {
    pub audience: Audience,
    pub days_left: i64,
    pub title: String,
    pub body: String,
}

impl ExpiryNotification {
    fn for_admins(days_left: i64) -> Self {
        let unit = if days_left == 1 { "day" } else { "days" };
        Self {
            audience: Audience::Admins,
            days_left,
            title: format!("Azure Blob Storage SAS token expires in {days_left} {unit}"),
            body: format!(
                "The SAS token used to store uploads in Azure Blob Storage expires in \
                 {days_left} {unit}. Generate a new token and update the site configuration \
                 before it expires, or uploads will start failing."
            ),
        }
    }
}

/// Boxed future returned by [`NotificationSink::deliver`].
pub type DeliverFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Delivers notifications, e.g. as a private message to a group.
pub trait NotificationSink: Send + Sync {
    fn deliver<'a>(&'a self, notification: &'a ExpiryNotification) -> DeliverFuture<'a>;
}

/// Sink that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn deliver<'a>(&'a self, notification: &'a ExpiryNotification) -> DeliverFuture<'a> {
        Box::pin(async move {
            warn!(
                "[{:?}] {}: {}",
                notification.audience, notification.title, notification.body
            );
            Ok(())
        })
    }
}

/// Expiry date of a SAS token.
///
/// `Ok(None)` when the token has no `se` parameter.  Both `2025-03-01` and
/// `2025-03-01T00:00:00Z` are accepted; only the date is used.
pub fn parse_sas_expiry(token: &str) -> Result<Option<NaiveDate>, WatchdogError> {
    let query = token.trim().trim_start_matches('?');
    let Some((_, value)) = url::form_urlencoded::parse(query.as_bytes()).find(|(k, _)| k == "se")
    else {
        return Ok(None);
    };

    let date = value
        .trim()
        .split(['T', ' '])
        .next()
        .unwrap_or_default();
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| WatchdogError::InvalidExpiry {
            value: value.to_string(),
        })
}

/// Whole days from `today` until `expiry`; negative once expired.
pub fn days_left(expiry: NaiveDate, today: NaiveDate) -> i64 {
    (expiry - today).num_days()
}

/// Decides on which days a warning goes out.
#[derive(Debug, Clone)]
pub struct ExpiryWatchdog {
    warn_on_days: Vec<i64>,
}

impl Default for ExpiryWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_ON_DAYS.to_vec())
    }
}

impl ExpiryWatchdog {
    pub fn new(warn_on_days: Vec<i64>) -> Self {
        Self { warn_on_days }
    }

    /// An empty threshold list falls back to the defaults.
    pub fn from_config(config: &WatchdogConfig) -> Self {
        if config.warn_on_days.is_empty() {
            Self::default()
        } else {
            Self::new(config.warn_on_days.clone())
        }
    }

    pub fn warn_on_days(&self) -> &[i64] {
        &self.warn_on_days
    }

    /// The notification to send today for `token`, if any.
    pub fn check_and_warn(
        &self,
        token: &str,
        today: NaiveDate,
    ) -> Result<Option<ExpiryNotification>, WatchdogError> {
        let Some(expiry) = parse_sas_expiry(token)? else {
            return Ok(None);
        };
        let days_left = days_left(expiry, today);
        if self.warn_on_days.contains(&days_left) {
            Ok(Some(ExpiryNotification::for_admins(days_left)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "sv=2022-11-02&ss=b&srt=sco&sp=rwdlac&se=2025-03-01&st=2024-03-01&spr=https&sig=abc%2Bdef%3D";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_expiry() {
        assert_eq!(parse_sas_expiry(TOKEN), Ok(Some(date(2025, 3, 1))));
        assert_eq!(
            parse_sas_expiry(&format!("?{TOKEN}")),
            Ok(Some(date(2025, 3, 1)))
        );
    }

    #[test]
    fn test_parse_datetime_expiry() {
        assert_eq!(
            parse_sas_expiry("sv=2022-11-02&se=2025-03-01T12%3A30%3A00Z&sig=x"),
            Ok(Some(date(2025, 3, 1)))
        );
    }

    #[test]
    fn test_parse_missing_expiry() {
        assert_eq!(parse_sas_expiry("sv=2022-11-02&si=policy&sig=x"), Ok(None));
        assert_eq!(parse_sas_expiry(""), Ok(None));
    }

    #[test]
    fn test_parse_malformed_expiry() {
        assert_eq!(
            parse_sas_expiry("se=next-tuesday&sig=x"),
            Err(WatchdogError::InvalidExpiry {
                value: "next-tuesday".to_string()
            })
        );
        assert!(parse_sas_expiry("se=&sig=x").is_err());
    }

    #[test]
    fn test_days_left() {
        assert_eq!(days_left(date(2025, 3, 1), date(2025, 2, 26)), 3);
        assert_eq!(days_left(date(2025, 3, 1), date(2025, 2, 27)), 2);
        assert_eq!(days_left(date(2025, 3, 1), date(2025, 3, 2)), -1);
    }

    #[test]
    fn test_warns_on_thresholds() {
        let watchdog = ExpiryWatchdog::default();
        let expiry = date(2025, 3, 1);
        for days in [30, 20, 10, 3, 2, 1] {
            let today = expiry - chrono::Duration::days(days);
            let notification = watchdog.check_and_warn(TOKEN, today).unwrap().unwrap();
            assert_eq!(notification.days_left, days);
            assert_eq!(notification.audience, Audience::Admins);
            assert!(notification.title.contains(&days.to_string()));
        }
    }

    #[test]
    fn test_silent_off_thresholds() {
        let watchdog = ExpiryWatchdog::default();
        let expiry = date(2025, 3, 1);
        for days in [29, 4, 0, -1] {
            let today = expiry - chrono::Duration::days(days);
            assert_eq!(watchdog.check_and_warn(TOKEN, today), Ok(None));
        }
    }

    #[test]
    fn test_round_trip_from_token() {
        let watchdog = ExpiryWatchdog::default();
        let n = watchdog
            .check_and_warn(TOKEN, date(2025, 2, 26))
            .unwrap()
            .unwrap();
        assert_eq!(n.days_left, 3);
        let n = watchdog
            .check_and_warn(TOKEN, date(2025, 2, 27))
            .unwrap()
            .unwrap();
        assert_eq!(n.days_left, 2);
        assert_eq!(n.title, "Azure Blob Storage SAS token expires in 2 days");
    }

    #[test]
    fn test_singular_day() {
        let n = ExpiryNotification::for_admins(1);
        assert!(n.title.ends_with("in 1 day"));
    }

    #[test]
    fn test_custom_thresholds() {
        let watchdog = ExpiryWatchdog::from_config(&WatchdogConfig {
            warn_on_days: vec![7],
        });
        assert!(watchdog
            .check_and_warn(TOKEN, date(2025, 2, 22))
            .unwrap()
            .is_some());
        assert_eq!(watchdog.check_and_warn(TOKEN, date(2025, 2, 26)), Ok(None));

        let empty = ExpiryWatchdog::from_config(&WatchdogConfig {
            warn_on_days: vec![],
        });
        assert_eq!(empty.warn_on_days(), &DEFAULT_WARN_ON_DAYS);
    }

    #[tokio::test]
    async fn test_log_sink_delivers() {
        let n = ExpiryNotification::for_admins(3);
        LogNotificationSink.deliver(&n).await.unwrap();
    }
}
