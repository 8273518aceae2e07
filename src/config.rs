//! Watcher configuration and environment loading.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `DF_NOTIF_CREATE_SERVICE_URL` | create callback URL |
//! | `DF_NOTIF_REMOVE_SERVICE_URL` | remove callback URL |
//! | `DF_NOTIFICATION_URL` | fallback for either callback when its own variable is unset |
//! | `DF_CLUSTER_URL` | Kubernetes API server URL, inferred when unset |
//! | `DF_NAMESPACE` | namespace to watch, the client default when unset |
//! | `DF_RETRIES` | attempts per callback (default 50) |
//! | `DF_RETRY_INTERVAL` | seconds between attempts (default 5) |

use http::Uri;
use reqwest::Url;

use crate::error::{Error, NotificationKind, Result};
use crate::notify::RetryPolicy;

/// Create callback URL variable.
pub const CREATE_URL_VAR: &str = "DF_NOTIF_CREATE_SERVICE_URL";
/// Remove callback URL variable.
pub const REMOVE_URL_VAR: &str = "DF_NOTIF_REMOVE_SERVICE_URL";
/// Shared fallback callback URL variable.
pub const FALLBACK_URL_VAR: &str = "DF_NOTIFICATION_URL";
/// API server URL variable.
pub const CLUSTER_URL_VAR: &str = "DF_CLUSTER_URL";
/// Namespace variable.
pub const NAMESPACE_VAR: &str = "DF_NAMESPACE";
/// Attempts per callback variable.
pub const RETRIES_VAR: &str = "DF_RETRIES";
/// Seconds between attempts variable.
pub const RETRY_INTERVAL_VAR: &str = "DF_RETRY_INTERVAL";

// `RetryPolicy` always makes at least one attempt, so a configured 0 behaves as 1.
const DEFAULT_RETRIES: u32 = 50;
const DEFAULT_RETRY_INTERVAL: i64 = 5;

/// Base URLs of the create and remove callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationTargets {
    /// Receives `?serviceName=<name>` plus forwarded labels for new services.
    pub create: Url,
    /// Receives `?serviceName=<name>` for removed services.
    pub remove: Url,
}

impl NotificationTargets {
    /// Creates targets with distinct create and remove URLs.
    #[must_use]
    pub fn new(create: Url, remove: Url) -> Self {
        Self { create, remove }
    }

    /// Uses one URL for both callbacks.
    #[must_use]
    pub fn shared(url: Url) -> Self {
        Self {
            create: url.clone(),
            remove: url,
        }
    }

    /// Resolves targets from specific URLs, falling back to `fallback` for any
    /// that is missing or empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingTarget`] if a callback resolves to nothing, or
    /// [`Error::InvalidUrl`] if a value does not parse.
    pub fn resolve(
        create: Option<&str>,
        remove: Option<&str>,
        fallback: Option<&str>,
    ) -> Result<Self> {
        let pick = |specific: Option<&str>, key: &str, kind: NotificationKind| {
            match non_empty(specific) {
                Some(value) => parse_url(key, value),
                None => match non_empty(fallback) {
                    Some(value) => parse_url(FALLBACK_URL_VAR, value),
                    None => Err(Error::MissingTarget(kind)),
                },
            }
        };

        Ok(Self {
            create: pick(create, CREATE_URL_VAR, NotificationKind::Create)?,
            remove: pick(remove, REMOVE_URL_VAR, NotificationKind::Remove)?,
        })
    }
}

/// Configuration for a [`ServiceWatcher`](crate::ServiceWatcher).
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Callback URLs.
    pub targets: NotificationTargets,

    /// Kubernetes API server. If `None`, the client configuration is inferred
    /// from the environment (in-cluster or kubeconfig).
    pub cluster_url: Option<Uri>,

    /// The Kubernetes namespace whose services are watched.
    /// If `None`, uses the current namespace from the kube client.
    pub namespace: Option<String>,

    /// Delivery attempts and pause per callback.
    pub retry: RetryPolicy,
}

impl WatcherConfig {
    /// Creates a configuration with default retry settings.
    #[must_use]
    pub fn new(targets: NotificationTargets) -> Self {
        Self {
            targets,
            cluster_url: None,
            namespace: None,
            retry: RetryPolicy::new(DEFAULT_RETRIES, DEFAULT_RETRY_INTERVAL),
        }
    }

    /// Sets an explicit API server URL.
    #[must_use]
    pub fn cluster_url(mut self, url: Uri) -> Self {
        self.cluster_url = Some(url);
        self
    }

    /// Sets an explicit namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the delivery retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Loads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// See [`WatcherConfig::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name to its value.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a callback URL is missing or any value fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let create = lookup(CREATE_URL_VAR);
        let remove = lookup(REMOVE_URL_VAR);
        let fallback = lookup(FALLBACK_URL_VAR);
        let targets = NotificationTargets::resolve(
            create.as_deref(),
            remove.as_deref(),
            fallback.as_deref(),
        )?;

        let mut config = Self::new(targets);

        if let Some(value) = non_empty(lookup(CLUSTER_URL_VAR).as_deref()) {
            let uri = value.parse::<Uri>().map_err(|e| Error::InvalidUrl {
                key: CLUSTER_URL_VAR.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            })?;
            config = config.cluster_url(uri);
        }

        if let Some(value) = non_empty(lookup(NAMESPACE_VAR).as_deref()) {
            config = config.namespace(value);
        }

        let retries = match non_empty(lookup(RETRIES_VAR).as_deref()) {
            Some(value) => parse_number(RETRIES_VAR, value)?,
            None => DEFAULT_RETRIES,
        };
        let interval = match non_empty(lookup(RETRY_INTERVAL_VAR).as_deref()) {
            Some(value) => parse_number(RETRY_INTERVAL_VAR, value)?,
            None => DEFAULT_RETRY_INTERVAL,
        };

        Ok(config.retry(RetryPolicy::new(retries, interval)))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::InvalidUrl {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn targets_specific_urls() {
        let targets =
            NotificationTargets::resolve(Some("http://p/create"), Some("http://p/remove"), None)
                .unwrap();

        assert_eq!(targets.create.as_str(), "http://p/create");
        assert_eq!(targets.remove.as_str(), "http://p/remove");
    }

    #[test]
    fn targets_fall_back_per_callback() {
        let targets =
            NotificationTargets::resolve(Some("http://p/create"), Some(""), Some("http://p/any"))
                .unwrap();

        assert_eq!(targets.create.as_str(), "http://p/create");
        assert_eq!(targets.remove.as_str(), "http://p/any");
    }

    #[test]
    fn targets_missing() {
        let err = NotificationTargets::resolve(Some("http://p/create"), None, None).unwrap_err();
        assert!(matches!(err, Error::MissingTarget(NotificationKind::Remove)));
    }

    #[test]
    fn targets_invalid_url() {
        let err = NotificationTargets::resolve(Some("not a url"), None, Some("http://p/any"))
            .unwrap_err();

        match err {
            Error::InvalidUrl { key, value, .. } => {
                assert_eq!(key, CREATE_URL_VAR);
                assert_eq!(value, "not a url");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn targets_shared() {
        let targets = NotificationTargets::shared(Url::parse("http://p/hook").unwrap());
        assert_eq!(targets.create, targets.remove);
    }

    #[test]
    fn config_defaults() {
        let config = WatcherConfig::from_lookup(lookup(&[(FALLBACK_URL_VAR, "http://p/hook")]))
            .unwrap();

        assert!(config.cluster_url.is_none());
        assert!(config.namespace.is_none());
        assert_eq!(config.retry.attempts(), 50);
        assert_eq!(config.retry.interval(), Duration::from_secs(5));
    }

    #[test]
    fn config_all_variables() {
        let config = WatcherConfig::from_lookup(lookup(&[
            (CREATE_URL_VAR, "http://p/create"),
            (REMOVE_URL_VAR, "http://p/remove"),
            (CLUSTER_URL_VAR, "https://10.0.0.1:6443"),
            (NAMESPACE_VAR, "proxy"),
            (RETRIES_VAR, "3"),
            (RETRY_INTERVAL_VAR, "0"),
        ]))
        .unwrap();

        assert_eq!(config.targets.create.as_str(), "http://p/create");
        let cluster_url = config.cluster_url.unwrap();
        assert_eq!(cluster_url.host(), Some("10.0.0.1"));
        assert_eq!(cluster_url.port_u16(), Some(6443));
        assert_eq!(config.namespace.as_deref(), Some("proxy"));
        assert_eq!(config.retry, RetryPolicy::new(3, 0));
    }

    #[test]
    fn config_invalid_retries() {
        let err = WatcherConfig::from_lookup(lookup(&[
            (FALLBACK_URL_VAR, "http://p/hook"),
            (RETRIES_VAR, "many"),
        ]))
        .unwrap_err();

        assert!(matches!(err, Error::InvalidNumber { .. }));
    }

    #[test]
    fn config_builder() {
        let targets = NotificationTargets::shared(Url::parse("http://p/hook").unwrap());
        let config = WatcherConfig::new(targets)
            .namespace("proxy")
            .retry(RetryPolicy::new(2, 1));

        assert_eq!(config.namespace.as_deref(), Some("proxy"));
        assert_eq!(config.retry.attempts(), 2);
    }
}
