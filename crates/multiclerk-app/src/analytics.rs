// Usage analytics: one event per adjudicated auction URL per day.
//
// Delivery is fire-and-forget. Failures are logged at debug level and never
// reach the coordination loop.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use multiclerk_core::db::Database;
use multiclerk_core::dispatch::{AdjudicationLog, NoopLog};

use crate::config::AnalyticsConfig;

const DAY_LOG_KEY: &str = "analytics_day_log";
const EVENT_NAME: &str = "live_auction";

/// URLs already reported on `day`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayLog {
    pub day: NaiveDate,
    pub urls: Vec<String>,
}

impl DayLog {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            urls: Vec::new(),
        }
    }

    /// Record `url` for `today`, rolling the log over on a new day. Returns
    /// `true` when the URL had not been reported yet today.
    pub fn should_send(&mut self, today: NaiveDate, url: &str) -> bool {
        if self.day != today {
            *self = DayLog::new(today);
        }
        if self.urls.iter().any(|u| u == url) {
            return false;
        }
        self.urls.push(url.to_string());
        true
    }
}

/// Body of one analytics event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEvent {
    pub name: &'static str,
    pub url: String,
    pub domain: String,
    pub props: UsageProps,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageProps {
    pub auction_url: String,
    pub extension_version: &'static str,
}

impl UsageEvent {
    pub fn new(site: &str, auction_url: &str) -> Self {
        Self {
            name: EVENT_NAME,
            url: site.to_string(),
            domain: site.to_string(),
            props: UsageProps {
                auction_url: auction_url.to_string(),
                extension_version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// Posts usage events to an analytics endpoint.
pub struct UsageReporter {
    http: reqwest::Client,
    endpoint: String,
    site: String,
    db: Arc<Database>,
}

impl UsageReporter {
    pub fn new(endpoint: String, site: String, db: Arc<Database>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            site,
            db,
        }
    }

    /// The configured adjudication log: a reporter when analytics is on,
    /// otherwise a no-op.
    pub fn from_config(config: &AnalyticsConfig, db: Arc<Database>) -> Box<dyn AdjudicationLog> {
        if config.enabled {
            Box::new(Self::new(config.endpoint.clone(), config.site.clone(), db))
        } else {
            Box::new(NoopLog)
        }
    }

    fn load_day_log(&self, today: NaiveDate) -> DayLog {
        match self.db.load_state(DAY_LOG_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable analytics log: {e}");
                DayLog::new(today)
            }),
            Ok(None) => DayLog::new(today),
            Err(e) => {
                warn!("Failed to load analytics log: {e:#}");
                DayLog::new(today)
            }
        }
    }

    fn store_day_log(&self, log: &DayLog) {
        let result = serde_json::to_value(log)
            .map_err(anyhow::Error::from)
            .and_then(|value| self.db.save_state(DAY_LOG_KEY, &value));
        if let Err(e) = result {
            warn!("Failed to save analytics log: {e:#}");
        }
    }

    fn send(&self, event: UsageEvent) {
        let request = self
            .http
            .post(&self.endpoint)
            .header(
                "user-agent",
                concat!("multiclerk/", env!("CARGO_PKG_VERSION")),
            )
            .json(&event);

        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!("Analytics endpoint answered {}", response.status());
                }
                Ok(_) => {}
                Err(e) => debug!("Analytics event not delivered: {e}"),
            }
        });
    }
}

impl AdjudicationLog for UsageReporter {
    fn record(&mut self, url: &str) {
        let today = Local::now().date_naive();
        let mut log = self.load_day_log(today);
        if !log.should_send(today, url) {
            return;
        }
        self.store_day_log(&log);
        self.send(UsageEvent::new(&self.site, url));
    }
}
