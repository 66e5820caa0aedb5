//! State for one backend instance of a balanced service.

use std::collections::HashSet;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use obalance_netdoc::{InstanceDescriptor, IntroPoint};

/// What came of feeding a received descriptor to an instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DescriptorUpdate {
    /// The introduction-point set changed; the master descriptor is
    /// now out of date.
    Changed,
    /// The descriptor was accepted but lists the same introduction
    /// points we already had.
    Unchanged,
    /// The descriptor was no newer than the cached one and was
    /// discarded.
    Rejected,
}

/// One backend onion service whose introduction points are eligible
/// for the master descriptor.
#[derive(Clone, Debug)]
pub struct Instance {
    /// The instance's onion address, without the `.onion` suffix.
    onion_address: String,
    /// Authentication cookie for the instance's descriptor, if any.
    ///
    /// Carried opaquely; decryption of cookie-protected descriptors is
    /// not supported, but the cookie is kept so a fetch layer that
    /// supports it can use it.
    auth_cookie: Option<String>,
    /// Introduction points from the most recent accepted descriptor.
    intro_points: Vec<IntroPoint>,
    /// When we last received any descriptor for this instance.
    last_received: Option<SystemTime>,
    /// Publication time of the currently cached descriptor.
    descriptor_timestamp: Option<SystemTime>,
    /// True when the cached introduction points have changed since
    /// they were last included in a published master descriptor.
    dirty: bool,
}

impl Instance {
    /// Create an instance with no descriptor yet.
    pub fn new(onion_address: impl Into<String>, auth_cookie: Option<String>) -> Self {
        Instance {
            onion_address: onion_address.into(),
            auth_cookie,
            intro_points: Vec::new(),
            last_received: None,
            descriptor_timestamp: None,
            dirty: false,
        }
    }

    /// The instance's onion address, without the `.onion` suffix.
    pub fn onion_address(&self) -> &str {
        &self.onion_address
    }

    /// The instance's descriptor cookie, if one is configured.
    pub fn auth_cookie(&self) -> Option<&str> {
        self.auth_cookie.as_deref()
    }

    /// The cached introduction points.
    pub fn intro_points(&self) -> &[IntroPoint] {
        &self.intro_points
    }

    /// When we last received a descriptor for this instance.
    pub fn last_received(&self) -> Option<SystemTime> {
        self.last_received
    }

    /// Publication time of the cached descriptor.
    pub fn descriptor_timestamp(&self) -> Option<SystemTime> {
        self.descriptor_timestamp
    }

    /// True if the cached points have not yet been consumed by a
    /// publish cycle.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record that the cached points were included in a published
    /// master descriptor.
    pub fn mark_published(&mut self) {
        self.dirty = false;
    }

    /// Record that a fetch for this instance failed outright.
    ///
    /// Clearing the receipt time makes the offline filter treat the
    /// instance as unreachable until a descriptor arrives.
    pub fn mark_unreachable(&mut self) {
        self.last_received = None;
    }

    /// Ingest a freshly received descriptor for this instance.
    ///
    /// Descriptors whose publication time is no newer than the cached
    /// one are discarded, so a directory replaying an old descriptor
    /// cannot roll our state back. Change detection compares the sets
    /// of introduction-point identifiers; reordering is not a change.
    pub fn update_descriptor(
        &mut self,
        descriptor: &InstanceDescriptor,
        now: SystemTime,
    ) -> DescriptorUpdate {
        // The receipt time records directory responsiveness, so it
        // moves even when the payload is later discarded.
        self.last_received = Some(now);
        debug!(
            "Received a descriptor for instance {}.onion.",
            self.onion_address
        );

        if let Some(cached) = self.descriptor_timestamp {
            if descriptor.published <= cached {
                warn!(
                    "Received descriptor for instance {}.onion with publication \
                     timestamp no newer than the cached descriptor. Ignoring it.",
                    self.onion_address
                );
                return DescriptorUpdate::Rejected;
            }
        }
        self.descriptor_timestamp = Some(descriptor.published);

        let new_ids: HashSet<&str> = descriptor
            .intro_points
            .iter()
            .map(|p| p.identifier.as_str())
            .collect();
        let cached_ids: HashSet<&str> = self
            .intro_points
            .iter()
            .map(|p| p.identifier.as_str())
            .collect();

        if new_ids != cached_ids {
            info!(
                "The introduction point set has changed for instance {}.onion.",
                self.onion_address
            );
            self.dirty = true;
            self.intro_points = descriptor.intro_points.clone();
            DescriptorUpdate::Changed
        } else {
            debug!(
                "Introduction points for instance {}.onion matched the cached set.",
                self.onion_address
            );
            DescriptorUpdate::Unchanged
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    use std::net::IpAddr;
    use std::time::Duration;

    use obalance_crypto::testing::TEST_KEY_PEM;
    use obalance_crypto::ServiceKey;

    fn point(identifier: &str) -> IntroPoint {
        IntroPoint::new(
            identifier,
            "203.0.113.1".parse::<IpAddr>().unwrap(),
            9001,
            "",
            "",
        )
    }

    fn descriptor(published: SystemTime, identifiers: &[&str]) -> InstanceDescriptor {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        InstanceDescriptor::new(
            key.public().clone(),
            published,
            identifiers.iter().map(|id| point(id)).collect(),
        )
    }

    #[test]
    fn first_descriptor_is_a_change() {
        let now = SystemTime::now();
        let mut instance = Instance::new("r523s7jx65ckitf4", None);
        let update = instance.update_descriptor(&descriptor(now, &["a", "b"]), now);
        assert_eq!(update, DescriptorUpdate::Changed);
        assert!(instance.is_dirty());
        assert_eq!(instance.intro_points().len(), 2);
        assert_eq!(instance.last_received(), Some(now));
        assert_eq!(instance.descriptor_timestamp(), Some(now));
    }

    #[test]
    fn replay_is_rejected() {
        let now = SystemTime::now();
        let earlier = now - Duration::from_secs(600);
        let mut instance = Instance::new("r523s7jx65ckitf4", None);

        instance.update_descriptor(&descriptor(now, &["a", "b"]), now);
        instance.mark_published();

        // An older descriptor must change nothing but the receipt time.
        let update = instance.update_descriptor(&descriptor(earlier, &["c"]), now);
        assert_eq!(update, DescriptorUpdate::Rejected);
        assert!(!instance.is_dirty());
        assert_eq!(instance.descriptor_timestamp(), Some(now));
        let ids: Vec<&str> = instance
            .intro_points()
            .iter()
            .map(|p| p.identifier.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        // Equal timestamps are a replay too.
        let update = instance.update_descriptor(&descriptor(now, &["c"]), now);
        assert_eq!(update, DescriptorUpdate::Rejected);
    }

    #[test]
    fn reordering_is_not_a_change() {
        let now = SystemTime::now();
        let later = now + Duration::from_secs(3600);
        let mut instance = Instance::new("r523s7jx65ckitf4", None);

        instance.update_descriptor(&descriptor(now, &["a", "b"]), now);
        instance.mark_published();

        let update = instance.update_descriptor(&descriptor(later, &["b", "a"]), later);
        assert_eq!(update, DescriptorUpdate::Unchanged);
        assert!(!instance.is_dirty());
        // The newer timestamp is still adopted.
        assert_eq!(instance.descriptor_timestamp(), Some(later));
    }

    #[test]
    fn changed_set_marks_dirty() {
        let now = SystemTime::now();
        let later = now + Duration::from_secs(3600);
        let mut instance = Instance::new("r523s7jx65ckitf4", None);

        instance.update_descriptor(&descriptor(now, &["a", "b"]), now);
        instance.mark_published();
        assert!(!instance.is_dirty());

        let update = instance.update_descriptor(&descriptor(later, &["a", "c"]), later);
        assert_eq!(update, DescriptorUpdate::Changed);
        assert!(instance.is_dirty());
    }

    #[test]
    fn unreachable_clears_receipt_time() {
        let now = SystemTime::now();
        let mut instance = Instance::new("r523s7jx65ckitf4", None);
        instance.update_descriptor(&descriptor(now, &["a"]), now);
        instance.mark_unreachable();
        assert_eq!(instance.last_received(), None);
        // The cached points survive; only freshness is lost.
        assert_eq!(instance.intro_points().len(), 1);
    }
}
