#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Webhook notifications for Kubernetes services that come and go.
//!
//! Services opt in by carrying the `com.df.notify` label. Each poll of the
//! cluster is compared with what was seen before: services created since the
//! last announced one are sent to a create callback, and announced services
//! that disappeared are sent to a remove callback. Reverse proxies, meshes
//! and dashboards can follow the cluster topology this way without talking
//! to the API server themselves.
//!
//! # Features
//!
//! - **Watermark detection**: only services newer than the last announced one are reported
//! - **Label forwarding**: `com.df.*` labels become callback query parameters
//! - **Fixed-interval retry**: every callback is retried independently, failures never block the batch
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use df_notify_k8s::{ServiceWatcher, WatcherConfig};
//!
//! let config = WatcherConfig::from_env()?;
//! let mut watcher = ServiceWatcher::connect(config).await?;
//!
//! // The caller decides the cadence
//! loop {
//!     match watcher.poll_once().await {
//!         Ok(report) if !report.is_ok() => tracing::warn!("some notifications failed"),
//!         Ok(_) => {}
//!         Err(e) => tracing::error!("poll failed: {e}"),
//!     }
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//! }
//! ```

mod config;
mod error;
mod k8s;
mod notify;
mod service;
mod tracker;
mod watcher;

pub use config::{
    CLUSTER_URL_VAR, CREATE_URL_VAR, FALLBACK_URL_VAR, NAMESPACE_VAR, NotificationTargets,
    REMOVE_URL_VAR, RETRIES_VAR, RETRY_INTERVAL_VAR, WatcherConfig,
};
pub use error::{BoxError, Error, NotificationKind, Result};
pub use k8s::KubeServiceSource;
pub use notify::{
    HttpTransport, Notifier, Reply, RetryPolicy, SERVICE_NAME_PARAM, Transport, callback_url,
};
pub use reqwest::Url;
pub use service::{LABEL_PREFIX, NOTIFY_LABEL, ServiceInfo, ServiceSource};
pub use tracker::{Membership, TrackedState};
pub use watcher::{PollReport, ServiceWatcher};
