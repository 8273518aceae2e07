//! Change detection against previously observed services.
//!
//! [`TrackedState`] remembers which eligible services have been announced and
//! the newest creation time accounted for (the watermark). Each poll result is
//! classified into services that are new and names that have disappeared.
//!
//! A name moves through two states:
//!
//! 1. [`Membership::Absent`] until detection first classifies it as new
//! 2. [`Membership::Known`] until a removal notification for it succeeds
//!
//! Failed create notifications do not move a service back to `Absent`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::service::ServiceInfo;

/// Tracking state of a single service name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    /// Never announced, or its removal has been delivered.
    Absent,
    /// Announced as new and not yet reported removed.
    Known {
        /// Whether a create callback for the service has succeeded.
        create_delivered: bool,
    },
}

/// In-memory record of announced services and the creation watermark.
///
/// Owned by a single poll cycle at a time; no interior synchronization.
#[derive(Clone, Debug, Default)]
pub struct TrackedState {
    known: HashMap<String, bool>,
    watermark: Option<DateTime<Utc>>,
}

impl TrackedState {
    /// Creates empty state with an unset watermark.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest creation time accounted for, if any eligible service has been seen.
    #[must_use]
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Current state of `name`.
    #[must_use]
    pub fn membership(&self, name: &str) -> Membership {
        match self.known.get(name) {
            Some(&create_delivered) => Membership::Known { create_delivered },
            None => Membership::Absent,
        }
    }

    /// Returns `true` if `name` is known.
    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains_key(name)
    }

    /// Number of known services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Returns `true` if no service is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Known services whose create callback has never succeeded, sorted by name.
    ///
    /// These are not re-announced; they are only reported again once removed.
    #[must_use]
    pub fn undelivered(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .known
            .iter()
            .filter(|&(_, &delivered)| !delivered)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Returns the eligible services created after the watermark, in input order.
    ///
    /// Every returned service becomes known and the watermark is raised to the
    /// newest creation time among them. All services are compared against the
    /// watermark as it stood when the call started, so the order of the poll
    /// does not matter.
    pub fn detect_new(&mut self, services: &[ServiceInfo]) -> Vec<ServiceInfo> {
        let since = self.watermark;
        let mut fresh = Vec::new();

        for svc in services {
            if !svc.is_eligible() {
                continue;
            }

            if since.is_some_and(|mark| svc.created_at <= mark) {
                continue;
            }

            self.admit(&svc.name);
            if self.watermark.is_none_or(|mark| mark < svc.created_at) {
                self.watermark = Some(svc.created_at);
            }

            tracing::debug!(service = %svc.name, created_at = %svc.created_at, "detected new service");
            fresh.push(svc.clone());
        }

        fresh
    }

    /// Returns known names absent from `services`, sorted.
    ///
    /// Only name presence is compared; labels are not re-checked. Nothing is
    /// released here, see [`TrackedState::release`].
    #[must_use]
    pub fn detect_removed(&self, services: &[ServiceInfo]) -> Vec<String> {
        let present: HashSet<&str> = services.iter().map(|svc| svc.name.as_str()).collect();

        let mut removed: Vec<String> = self
            .known
            .keys()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect();
        removed.sort_unstable();
        removed
    }

    /// Moves `name` from `Absent` to `Known`. Already known names keep their state.
    fn admit(&mut self, name: &str) {
        if !self.known.contains_key(name) {
            self.known.insert(name.to_string(), false);
        }
    }

    /// Records a successful create callback for a known service.
    pub fn confirm_created(&mut self, name: &str) {
        if let Some(delivered) = self.known.get_mut(name) {
            *delivered = true;
        }
    }

    /// Moves `name` back to `Absent` after its removal was delivered.
    ///
    /// Returns `true` if the name was known.
    pub fn release(&mut self, name: &str) -> bool {
        self.known.remove(name).is_some()
    }
}
