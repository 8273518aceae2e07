//! Service roster data model and the source contract.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Label whose presence opts a service into notifications. The value is ignored.
pub const NOTIFY_LABEL: &str = "com.df.notify";

/// Namespace prefix of labels forwarded as query parameters on create callbacks.
pub const LABEL_PREFIX: &str = "com.df.";

/// A service as reported by one poll of the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service name, unique within a poll result.
    pub name: String,

    /// Service labels.
    pub labels: BTreeMap<String, String>,

    /// Creation time according to the orchestrator clock.
    pub created_at: DateTime<Utc>,
}

impl ServiceInfo {
    /// Creates a service with no labels.
    #[must_use]
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            created_at,
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if the service carries the opt-in label.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.labels.contains_key(NOTIFY_LABEL)
    }

    /// Labels forwarded on the create callback, with [`LABEL_PREFIX`] stripped.
    ///
    /// The opt-in label itself and labels outside the prefix are skipped.
    /// Values pass through untouched, in label iteration order.
    pub fn notification_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().filter_map(|(key, value)| {
            if key == NOTIFY_LABEL {
                return None;
            }

            key.strip_prefix(LABEL_PREFIX)
                .map(|stripped| (stripped, value.as_str()))
        })
    }
}

/// Supplies the current list of services.
///
/// Any error is fatal for the poll cycle that requested the list.
pub trait ServiceSource {
    /// Lists the services currently known to the orchestrator.
    fn list(&self) -> impl Future<Output = Result<Vec<ServiceInfo>>> + Send;
}
