//! Webhook delivery of created and removed services.
//!
//! Each service in a batch gets its own `GET` callback, retried a fixed number
//! of times with a fixed pause in between. A callback succeeds only when the
//! request completes with status 200. Failures are logged where they become
//! final and folded into one [`Error::Delivery`] per batch, so a single
//! unreachable target does not stop the rest of the batch.
//!
//! Deliveries run one after another; a batch with failing targets can take up
//! to `attempts × interval` per failing service.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;

use crate::config::NotificationTargets;
use crate::error::{BoxError, Error, NotificationKind, Result};
use crate::service::ServiceInfo;
use crate::tracker::TrackedState;

/// Query parameter carrying the service name on every callback.
pub const SERVICE_NAME_PARAM: &str = "serviceName";

/// Attempt count and pause between attempts for a single callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy making up to `retries` attempts, `interval_seconds` apart.
    ///
    /// At least one attempt is always made. A zero or negative interval retries
    /// immediately.
    #[must_use]
    pub fn new(retries: u32, interval_seconds: i64) -> Self {
        Self {
            attempts: retries.max(1),
            interval: Duration::from_secs(u64::try_from(interval_seconds).unwrap_or(0)),
        }
    }

    /// Maximum number of attempts per callback.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause between attempts.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(50, 5)
    }
}

/// Outcome of a completed callback request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// HTTP status code.
    pub status: u16,
    /// Response body. Only needed when the status signals failure.
    pub body: String,
}

/// Issues callback requests.
pub trait Transport {
    /// Performs a `GET` on `url`. Errors mean the request did not complete.
    fn get(&self, url: &Url) -> impl Future<Output = std::result::Result<Reply, BoxError>> + Send;
}

/// [`Transport`] backed by a [`reqwest::Client`].
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<reqwest::Client> for HttpTransport {
    fn from(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> std::result::Result<Reply, BoxError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();

        // body is only reported on failure
        let body = if status == 200 {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };

        Ok(Reply { status, body })
    }
}

/// Sends create and remove callbacks for detected changes.
#[derive(Clone, Debug)]
pub struct Notifier<T = HttpTransport> {
    transport: T,
    targets: NotificationTargets,
}

impl Notifier<HttpTransport> {
    /// Creates a notifier using the default HTTP transport.
    #[must_use]
    pub fn http(targets: NotificationTargets) -> Self {
        Self::new(HttpTransport::new(), targets)
    }
}

impl<T: Transport> Notifier<T> {
    /// Creates a notifier sending through `transport`.
    #[must_use]
    pub fn new(transport: T, targets: NotificationTargets) -> Self {
        Self { transport, targets }
    }

    /// Callback targets in use.
    #[must_use]
    pub fn targets(&self) -> &NotificationTargets {
        &self.targets
    }

    /// Transport the callbacks go through.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Announces newly detected services on the create callback.
    ///
    /// Services without the opt-in label are skipped. A successful callback is
    /// recorded in `state`; a failed one leaves the service known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] if any callback exhausted its attempts.
    pub async fn notify_create(
        &self,
        services: &[ServiceInfo],
        state: &mut TrackedState,
        policy: RetryPolicy,
    ) -> Result<()> {
        let mut total = 0;
        let mut failed = 0;

        for svc in services {
            if !svc.is_eligible() {
                tracing::debug!(service = %svc.name, "skipping service without notify label");
                continue;
            }

            total += 1;
            let url = callback_url(&self.targets.create, &svc.name, svc.notification_params());
            tracing::info!(service = %svc.name, %url, "sending service created notification");

            if self.deliver(&url, policy).await.is_ok() {
                state.confirm_created(&svc.name);
            } else {
                failed += 1;
            }
        }

        batch_result(NotificationKind::Create, failed, total)
    }

    /// Reports removed services on the remove callback.
    ///
    /// Each name whose callback succeeds is released from `state`. Names whose
    /// callback fails stay known and are reported again on the next poll.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] if any callback exhausted its attempts.
    pub async fn notify_remove(
        &self,
        names: &[String],
        state: &mut TrackedState,
        policy: RetryPolicy,
    ) -> Result<()> {
        let mut failed = 0;

        for name in names {
            let url = callback_url(&self.targets.remove, name, std::iter::empty());
            tracing::info!(service = %name, %url, "sending service removed notification");

            if self.deliver(&url, policy).await.is_ok() {
                state.release(name);
            } else {
                failed += 1;
            }
        }

        batch_result(NotificationKind::Remove, failed, names.len())
    }

    /// Sends one callback until it succeeds or `policy` runs out of attempts.
    async fn deliver(&self, url: &Url, policy: RetryPolicy) -> Result<()> {
        let mut attempt = 1;

        loop {
            let err = match self.transport.get(url).await {
                Ok(reply) if reply.status == 200 => {
                    if attempt > 1 {
                        tracing::debug!(%url, attempt, "notification recovered after retry");
                    }
                    return Ok(());
                }
                Ok(reply) => Error::UnexpectedStatus {
                    url: url.to_string(),
                    status: reply.status,
                    body: reply.body,
                },
                Err(source) => Error::Transport {
                    url: url.to_string(),
                    source,
                },
            };

            if attempt >= policy.attempts() {
                tracing::error!(%url, attempts = attempt, "{err}");
                return Err(err);
            }

            tracing::warn!(%url, attempt, error = %err, "notification failed, retrying");
            if !policy.interval().is_zero() {
                tokio::time::sleep(policy.interval()).await;
            }

            attempt += 1;
        }
    }
}

/// Appends the service name and any extra parameters to a callback base URL.
///
/// Existing query pairs on `base` are kept.
pub fn callback_url<'a>(
    base: &Url,
    service_name: &str,
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Url {
    let mut url = base.clone();

    {
        let mut query = url.query_pairs_mut();
        query.append_pair(SERVICE_NAME_PARAM, service_name);
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }

    url
}

fn batch_result(kind: NotificationKind, failed: usize, total: usize) -> Result<()> {
    if failed == 0 {
        Ok(())
    } else {
        Err(Error::Delivery {
            kind,
            failed,
            total,
        })
    }
}
