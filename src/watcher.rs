//! One poll cycle over the service roster.
//!
//! A cycle runs strictly in sequence: list, detect new, detect removed,
//! notify create, notify remove. Scheduling cycles is left to the caller;
//! [`ServiceWatcher::poll_once`] takes `&mut self`, so cycles never overlap.

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::k8s::KubeServiceSource;
use crate::notify::{HttpTransport, Notifier, RetryPolicy, Transport};
use crate::service::ServiceSource;
use crate::tracker::TrackedState;

/// Outcome of one poll cycle.
#[derive(Debug)]
pub struct PollReport {
    /// Services announced on the create callback, in poll order.
    pub created: Vec<String>,

    /// Services reported on the remove callback.
    pub removed: Vec<String>,

    /// Aggregate result of the create batch.
    pub create_result: Result<()>,

    /// Aggregate result of the remove batch.
    pub remove_result: Result<()>,
}

impl PollReport {
    /// Returns `true` if every callback in the cycle succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.create_result.is_ok() && self.remove_result.is_ok()
    }
}

/// Owns the tracked state and drives poll cycles against a source and notifier.
pub struct ServiceWatcher<S, T = HttpTransport> {
    source: S,
    notifier: Notifier<T>,
    state: TrackedState,
    retry: RetryPolicy,
}

impl ServiceWatcher<KubeServiceSource, HttpTransport> {
    /// Connects to Kubernetes and sends callbacks over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be configured.
    pub async fn connect(config: WatcherConfig) -> Result<Self> {
        let source = KubeServiceSource::connect(&config).await?;
        let notifier = Notifier::http(config.targets);

        Ok(Self::new(source, notifier, config.retry))
    }
}

impl<S, T> ServiceWatcher<S, T>
where
    S: ServiceSource,
    T: Transport,
{
    /// Creates a watcher with empty tracked state.
    #[must_use]
    pub fn new(source: S, notifier: Notifier<T>, retry: RetryPolicy) -> Self {
        Self {
            source,
            notifier,
            state: TrackedState::new(),
            retry,
        }
    }

    /// Tracked state accumulated so far.
    #[must_use]
    pub fn state(&self) -> &TrackedState {
        &self.state
    }

    /// Runs one cycle.
    ///
    /// Delivery failures do not fail the cycle; they are reported in the
    /// returned [`PollReport`] and retried by later cycles where applicable.
    ///
    /// # Errors
    ///
    /// Returns the source error if listing fails. Nothing is detected or sent
    /// in that case.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let services = self.source.list().await?;

        let created = self.state.detect_new(&services);
        let removed = self.state.detect_removed(&services);

        tracing::debug!(
            services = services.len(),
            new = created.len(),
            removed = removed.len(),
            "polled services"
        );

        let create_result = self
            .notifier
            .notify_create(&created, &mut self.state, self.retry)
            .await;
        if let Err(e) = &create_result {
            tracing::warn!("{e}");
        }

        let remove_result = self
            .notifier
            .notify_remove(&removed, &mut self.state, self.retry)
            .await;
        if let Err(e) = &remove_result {
            tracing::warn!("{e}");
        }

        Ok(PollReport {
            created: created.into_iter().map(|svc| svc.name).collect(),
            removed,
            create_result,
            remove_result,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use reqwest::Url;

    use super::*;
    use crate::config::NotificationTargets;
    use crate::error::{BoxError, Error};
    use crate::notify::Reply;
    use crate::service::{NOTIFY_LABEL, ServiceInfo};
    use crate::tracker::Membership;

    // Hands out queued poll results in order.
    struct QueuedSource {
        polls: Mutex<VecDeque<Result<Vec<ServiceInfo>>>>,
    }

    impl QueuedSource {
        fn new(polls: Vec<Result<Vec<ServiceInfo>>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
            }
        }
    }

    impl ServiceSource for QueuedSource {
        async fn list(&self) -> Result<Vec<ServiceInfo>> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    // Fails every request whose URL contains one of `failing`.
    struct Recorder {
        calls: Mutex<Vec<String>>,
        failing: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing: Mutex::new(Vec::new()),
            }
        }

        fn fail(&self, needle: &'static str) {
            self.failing.lock().unwrap().push(needle);
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn take_calls(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl Transport for Recorder {
        async fn get(&self, url: &Url) -> std::result::Result<Reply, BoxError> {
            self.calls.lock().unwrap().push(url.to_string());
            let fails = self
                .failing
                .lock()
                .unwrap()
                .iter()
                .any(|needle| url.as_str().contains(needle));

            Ok(Reply {
                status: if fails { 500 } else { 200 },
                body: String::new(),
            })
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn eligible(name: &str, secs: i64) -> ServiceInfo {
        ServiceInfo::new(name, at(secs)).label(NOTIFY_LABEL, "")
    }

    fn watcher(polls: Vec<Result<Vec<ServiceInfo>>>) -> ServiceWatcher<QueuedSource, Recorder> {
        let targets = NotificationTargets::new(
            Url::parse("http://x/create").unwrap(),
            Url::parse("http://x/remove").unwrap(),
        );

        ServiceWatcher::new(
            QueuedSource::new(polls),
            Notifier::new(Recorder::new(), targets),
            RetryPolicy::new(2, 0),
        )
    }

    fn transport(watcher: &ServiceWatcher<QueuedSource, Recorder>) -> &Recorder {
        watcher.notifier.transport()
    }

    #[tokio::test]
    async fn cycle_announces_then_removes() {
        let mut watcher = watcher(vec![
            Ok(vec![eligible("web", 1), ServiceInfo::new("db", at(2))]),
            Ok(vec![ServiceInfo::new("db", at(2))]),
        ]);

        let first = watcher.poll_once().await.unwrap();
        assert!(first.is_ok());
        assert_eq!(first.created, vec!["web".to_string()]);
        assert!(first.removed.is_empty());
        assert_eq!(
            transport(&watcher).take_calls(),
            vec!["http://x/create?serviceName=web".to_string()]
        );

        let second = watcher.poll_once().await.unwrap();
        assert!(second.is_ok());
        assert!(second.created.is_empty());
        assert_eq!(second.removed, vec!["web".to_string()]);
        assert_eq!(
            transport(&watcher).take_calls(),
            vec!["http://x/remove?serviceName=web".to_string()]
        );
        assert!(watcher.state().is_empty());
    }

    #[tokio::test]
    async fn list_failure_skips_cycle() {
        let mut watcher = watcher(vec![Err(Error::query(std::io::Error::other("api down")))]);

        let err = watcher.poll_once().await.unwrap_err();

        assert!(matches!(err, Error::Query(_)));
        assert!(transport(&watcher).take_calls().is_empty());
        assert!(watcher.state().watermark().is_none());
    }

    #[tokio::test]
    async fn failed_removal_retried_next_cycle() {
        let mut watcher = watcher(vec![Ok(vec![eligible("web", 1)]), Ok(vec![]), Ok(vec![])]);

        watcher.poll_once().await.unwrap();
        transport(&watcher).take_calls();

        transport(&watcher).fail("/remove");
        let second = watcher.poll_once().await.unwrap();
        assert!(second.remove_result.is_err());
        assert!(second.create_result.is_ok());
        assert_eq!(transport(&watcher).take_calls().len(), 2);
        assert!(watcher.state().is_known("web"));

        transport(&watcher).heal();
        let third = watcher.poll_once().await.unwrap();
        assert!(third.is_ok());
        assert_eq!(third.removed, vec!["web".to_string()]);
        assert!(!watcher.state().is_known("web"));
    }

    #[tokio::test]
    async fn failed_create_is_not_resent() {
        let mut watcher = watcher(vec![
            Ok(vec![eligible("web", 1)]),
            Ok(vec![eligible("web", 1)]),
        ]);

        transport(&watcher).fail("/create");
        let first = watcher.poll_once().await.unwrap();
        assert!(first.create_result.is_err());
        assert_eq!(
            watcher.state().membership("web"),
            Membership::Known {
                create_delivered: false
            }
        );

        transport(&watcher).heal();
        transport(&watcher).take_calls();
        let second = watcher.poll_once().await.unwrap();
        assert!(second.created.is_empty());
        assert!(transport(&watcher).take_calls().is_empty());
        assert_eq!(watcher.state().undelivered(), vec!["web"]);
    }

    #[tokio::test]
    async fn older_service_listed_after_newer_is_announced_and_removed() {
        let mut watcher = watcher(vec![
            Ok(vec![eligible("seed", 1)]),
            Ok(vec![eligible("seed", 1), eligible("api", 30), eligible("web", 20)]),
            Ok(vec![eligible("seed", 1), eligible("api", 30)]),
        ]);

        watcher.poll_once().await.unwrap();
        transport(&watcher).take_calls();

        let second = watcher.poll_once().await.unwrap();
        assert!(second.is_ok());
        assert_eq!(second.created, vec!["api".to_string(), "web".to_string()]);
        assert_eq!(
            transport(&watcher).take_calls(),
            vec![
                "http://x/create?serviceName=api".to_string(),
                "http://x/create?serviceName=web".to_string(),
            ]
        );

        let third = watcher.poll_once().await.unwrap();
        assert!(third.is_ok());
        assert!(third.created.is_empty());
        assert_eq!(third.removed, vec!["web".to_string()]);
        assert_eq!(
            transport(&watcher).take_calls(),
            vec!["http://x/remove?serviceName=web".to_string()]
        );
        assert!(!watcher.state().is_known("web"));
    }

    #[test]
    fn notifier_exposes_targets() {
        let watcher = watcher(Vec::new());
        let targets = watcher.notifier.targets();

        assert_eq!(targets.create.as_str(), "http://x/create");
        assert_eq!(targets.remove.as_str(), "http://x/remove");
    }
}
