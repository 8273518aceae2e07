//! Kubernetes service listing.
//!
//! [`KubeServiceSource`] lists `Service` objects in one namespace and converts
//! each into a [`ServiceInfo`]: the name from `metadata.name`, labels from
//! `metadata.labels` and the creation time from `metadata.creationTimestamp`.
//!
//! Every service is listed, not only opted-in ones, since removal is decided
//! by name presence alone.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::{Api, Client, Config};

use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::service::{ServiceInfo, ServiceSource};

/// [`ServiceSource`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeServiceSource {
    services: Api<Service>,
}

impl KubeServiceSource {
    /// Connects to the API server named in `config`, or the inferred one.
    ///
    /// # Requirements
    ///
    /// - RBAC permission to list `Service` resources in the namespace
    /// - Kubernetes client configuration (in-cluster or kubeconfig) unless
    ///   `config.cluster_url` is set
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`] if no client can be configured.
    pub async fn connect(config: &WatcherConfig) -> Result<Self> {
        let client = match &config.cluster_url {
            Some(url) => Client::try_from(Config::new(url.clone()))?,
            None => Client::try_default().await?,
        };

        Ok(Self::new(client, config.namespace.as_deref()))
    }

    /// Wraps an existing client. If `namespace` is `None`, uses the client's default.
    #[must_use]
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let namespace = namespace.map_or_else(
            || client.default_namespace().to_string(),
            ToString::to_string,
        );
        let services = Api::namespaced(client, &namespace);

        tracing::debug!("listing Kubernetes services in namespace {namespace}");
        Self { services }
    }
}

impl ServiceSource for KubeServiceSource {
    async fn list(&self) -> Result<Vec<ServiceInfo>> {
        let list = self
            .services
            .list(&ListParams::default())
            .await
            .map_err(Error::query)?;

        Ok(list.items.iter().filter_map(service_info).collect())
    }
}

/// Converts a `Service` object. Objects without a name are skipped.
fn service_info(svc: &Service) -> Option<ServiceInfo> {
    let Some(name) = svc.metadata.name.clone() else {
        tracing::debug!("skipping service without a name");
        return None;
    };

    // the API server always stamps creation time; treat a missing one as the epoch
    let created_at = svc
        .metadata
        .creation_timestamp
        .as_ref()
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |time| {
            DateTime::<Utc>::from(SystemTime::from(time.0))
        });

    Some(ServiceInfo {
        name,
        labels: svc.metadata.labels.clone().unwrap_or_default(),
        created_at,
    })
}
