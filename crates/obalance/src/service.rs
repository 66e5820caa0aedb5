//! A front-facing service and its publish state machine.

use std::time::{Duration, SystemTime};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, error, info, warn};

use obalance_crypto::time::seconds_valid;
use obalance_crypto::ServiceKey;
use obalance_netdoc::desc::descriptor_id_at;
use obalance_netdoc::{generate, IntroPoint};

use crate::config::Config;
use crate::ctrl::ControlTransport;
use crate::err::ConfigError;
use crate::instance::Instance;
use crate::ring::ConsensusRing;
use crate::select::choose_intro_points;

/// Discard an instance's points when its cached descriptor's own
/// publication time is older than this.
const TIMESTAMP_MAX_AGE: Duration = Duration::from_secs(4 * 60 * 60);

/// A front-facing onion service to be load-balanced.
///
/// Owns the permanent key, the backend instances, and the publish
/// state. Everything here assumes the caller serializes access; in the
/// balancer each `Service` lives behind its own mutex, taken by both
/// the scheduler and the event-ingestion path.
#[derive(Debug)]
pub struct Service {
    /// The service's permanent key pair.
    key: ServiceKey,
    /// Onion address derived from the key, without the `.onion`
    /// suffix.
    onion_address: String,
    /// The backend instances serving this address.
    instances: Vec<Instance>,
    /// When we last attempted a publish cycle.
    ///
    /// Attempted, not succeeded: upload outcomes are per-directory and
    /// the next cycle retries naturally.
    last_uploaded: Option<SystemTime>,
}

impl Service {
    /// Create a service from a loaded key and its instances.
    ///
    /// A service with no instances can never publish anything useful,
    /// so that is a configuration error.
    pub fn new(key: ServiceKey, instances: Vec<Instance>) -> Result<Self, ConfigError> {
        let onion_address = key.onion_address();
        if instances.is_empty() {
            return Err(ConfigError::NoInstances {
                address: onion_address,
            });
        }
        Ok(Service {
            key,
            onion_address,
            instances,
            last_uploaded: None,
        })
    }

    /// The service's onion address, without the `.onion` suffix.
    pub fn onion_address(&self) -> &str {
        &self.onion_address
    }

    /// The backend instances.
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Mutable access to the backend instances.
    pub fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    /// When we last attempted a publish cycle.
    pub fn last_uploaded(&self) -> Option<SystemTime> {
        self.last_uploaded
    }

    /// True if any instance has unconsumed introduction-point changes.
    fn intro_points_modified(&self) -> bool {
        self.instances.iter().any(Instance::is_dirty)
    }

    /// True if the master descriptor is due for a routine re-upload.
    fn not_uploaded_recently(&self, now: SystemTime, upload_period: Duration) -> bool {
        match self.last_uploaded {
            None => true,
            Some(uploaded) => {
                now.duration_since(uploaded).unwrap_or_default() > upload_period
            }
        }
    }

    /// True if the descriptor ID rolls over within the overlap period.
    fn id_changing_soon(&self, now: SystemTime, overlap: Duration) -> bool {
        seconds_valid(now, &self.key.permanent_id()) < overlap.as_secs()
    }

    /// Collect the introduction-point pools of every instance that
    /// looks alive, clearing the dirty flag of each consumed instance.
    ///
    /// An instance is offline-by-inference when we never received a
    /// descriptor for it, when the last receipt is older than the
    /// upload period, or when the descriptor's own publication time is
    /// more than four hours old.
    fn select_pools(&mut self, now: SystemTime, upload_period: Duration) -> Vec<Vec<IntroPoint>> {
        let mut pools = Vec::new();
        for instance in &mut self.instances {
            let (received, timestamp) =
                match (instance.last_received(), instance.descriptor_timestamp()) {
                    (Some(r), Some(t)) => (r, t),
                    _ => {
                        info!(
                            "No descriptor received for instance {}.onion yet.",
                            instance.onion_address()
                        );
                        continue;
                    }
                };

            let received_age = now.duration_since(received).unwrap_or_default();
            let timestamp_age = now.duration_since(timestamp).unwrap_or_default();
            if received_age > upload_period || timestamp_age > TIMESTAMP_MAX_AGE {
                info!(
                    "Our descriptor for instance {}.onion is too old. The instance \
                     may be offline. Its introduction points will not be included \
                     in the master descriptor.",
                    instance.onion_address()
                );
                continue;
            }

            instance.mark_published();
            pools.push(instance.intro_points().to_vec());
        }
        pools
    }

    /// Evaluate the publish triggers and publish if any fire.
    ///
    /// Called once per scheduler tick. Near a descriptor-ID rollover a
    /// second set of descriptors is published one time period ahead,
    /// so clients holding either the current or the next descriptor ID
    /// can still find the service.
    pub fn consider_publish<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        transport: &dyn ControlTransport,
        ring: &ConsensusRing,
        config: &Config,
        force: bool,
        now: SystemTime,
    ) {
        if self.intro_points_modified()
            || self.not_uploaded_recently(now, config.descriptor_upload_period)
            || force
        {
            debug!(
                "Publishing a descriptor for service {}.onion.",
                self.onion_address
            );
            self.publish_descriptor(rng, transport, ring, config, 0, now);

            if self.id_changing_soon(now, config.descriptor_overlap_period) {
                info!(
                    "Publishing a descriptor for service {}.onion under the next \
                     descriptor ID.",
                    self.onion_address
                );
                self.publish_descriptor(rng, transport, ring, config, 1, now);
            }
        } else {
            debug!(
                "Not publishing a new descriptor for service {}.onion.",
                self.onion_address
            );
        }
    }

    /// Run one publish cycle: select points, build and sign a
    /// descriptor per replica, and hand them to the transport.
    fn publish_descriptor<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        transport: &dyn ControlTransport,
        ring: &ConsensusRing,
        config: &Config,
        periods_ahead: u64,
        now: SystemTime,
    ) {
        let mut pools = self.select_pools(now, config.descriptor_upload_period);
        // Randomize the instance order so quota assignment carries no
        // fixed first-instance bias.
        pools.shuffle(rng);
        let total: usize = pools.iter().map(Vec::len).sum();

        if config.distinct_descriptors && total > config.max_intro_points {
            self.publish_distinct(rng, transport, ring, config, &mut pools, periods_ahead, now);
        } else {
            self.publish_uniform(rng, transport, config, &pools, periods_ahead, now);
        }

        // Attempt time, regardless of per-upload outcomes: the control
        // protocol's upload events don't say which service they were
        // for, so success can't be attributed reliably.
        self.last_uploaded = Some(now);
    }

    /// Publish one shared descriptor per replica, letting Tor pick the
    /// target directories.
    fn publish_uniform<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        transport: &dyn ControlTransport,
        config: &Config,
        pools: &[Vec<IntroPoint>],
        periods_ahead: u64,
        now: SystemTime,
    ) {
        let points = choose_intro_points(rng, pools, config.max_intro_points);
        debug!(
            "Selected {} IPs of {} for service {}.onion.",
            points.len(),
            pools.iter().map(Vec::len).sum::<usize>(),
            self.onion_address
        );

        for replica in 0..config.replicas {
            match generate(&self.key, &points, replica, periods_ahead, now) {
                Err(e) => {
                    warn!("Error generating master descriptor: {}", e);
                }
                Ok(signed) => self.upload(transport, &signed, &[], replica),
            }
        }
    }

    /// Publish a distinct descriptor to each responsible directory,
    /// drawing a fresh introduction-point subset for every upload.
    ///
    /// Used when more points are available than fit in one descriptor:
    /// every individual descriptor stays within `max_intro_points`,
    /// but the directory set as a whole covers more of the backends.
    #[allow(clippy::too_many_arguments)]
    fn publish_distinct<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        transport: &dyn ControlTransport,
        ring: &ConsensusRing,
        config: &Config,
        pools: &mut [Vec<IntroPoint>],
        periods_ahead: u64,
        now: SystemTime,
    ) {
        let id = self.key.permanent_id();
        for replica in 0..config.replicas {
            let desc_id = descriptor_id_at(&id, now, None, replica, periods_ahead);
            let hsdirs = match ring.responsible_hsdirs(&desc_id, config.hsdir_set) {
                Err(e) => {
                    error!(
                        "Could not resolve responsible HSDirs for service {}.onion: {}",
                        self.onion_address, e
                    );
                    continue;
                }
                Ok(hsdirs) => hsdirs,
            };

            for hsdir in hsdirs {
                pools.shuffle(rng);
                let points = choose_intro_points(rng, pools, config.max_intro_points);
                match generate(&self.key, &points, replica, periods_ahead, now) {
                    Err(e) => {
                        warn!("Error generating master descriptor: {}", e);
                    }
                    Ok(signed) => {
                        self.upload(transport, &signed, std::slice::from_ref(&hsdir), replica);
                    }
                }
            }
        }
    }

    /// Hand one signed descriptor to the transport, logging the
    /// outcome. A failed upload never aborts the cycle.
    fn upload(
        &self,
        transport: &dyn ControlTransport,
        signed: &str,
        hsdirs: &[String],
        replica: u8,
    ) {
        match transport.upload_descriptor(signed, hsdirs) {
            Err(e) => {
                error!(
                    "Error uploading descriptor for service {}.onion: {}",
                    self.onion_address, e
                );
            }
            Ok(()) => {
                info!(
                    "Published a descriptor for service {}.onion under replica {}.",
                    self.onion_address, replica
                );
            }
        }
    }
}
