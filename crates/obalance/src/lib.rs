#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![doc = include_str!("../README.md")]
// @@ begin lint list maintained by maint/add_warning @@
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

pub mod config;
pub mod ctrl;
pub mod err;
pub mod instance;
pub mod ring;
pub mod scheduler;
pub mod select;
pub mod service;
pub mod status;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use obalance_crypto::ServiceKey;
use obalance_netdoc::parse_instance_descriptor;

pub use config::{Config, InstanceConfig, ServiceConfig};
pub use ctrl::{ControlTransport, RouterStatus, TransportError};
pub use err::{ConfigError, Error};
pub use instance::{DescriptorUpdate, Instance};
pub use ring::ConsensusRing;
pub use scheduler::Scheduler;
pub use select::choose_intro_points;
pub use service::Service;
#[cfg(unix)]
pub use status::StatusSocket;

/// Directories answer a fetch with one or two CRLF lines when they
/// have no matching descriptor; anything shorter than this is such a
/// non-answer.
const MIN_DESCRIPTOR_LEN: usize = 5;

/// The balancer: every configured service, the consensus ring, and
/// the transport they publish through.
///
/// This is the explicit context that the scheduler jobs and the
/// event-ingestion entry points all operate on; there is no global
/// state. Each service sits behind its own mutex, so the scheduler's
/// publish cycle and asynchronously delivered descriptor events can
/// never race on instance state.
pub struct Balancer {
    /// The control transport used for fetches and uploads.
    transport: Arc<dyn ControlTransport>,
    /// The tunables and service definitions we were built from.
    config: Config,
    /// The services being balanced.
    services: Vec<Mutex<Service>>,
    /// The HSDir ring from the latest consensus.
    ring: Mutex<ConsensusRing>,
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

impl Balancer {
    /// Build a balancer from its configuration, loading every
    /// service's private key.
    ///
    /// Any unloadable key, any service without instances, or a
    /// configuration without services is fatal here; we never start
    /// half-configured.
    pub fn new(config: Config, transport: Arc<dyn ControlTransport>) -> Result<Self, ConfigError> {
        if config.services.is_empty() {
            return Err(ConfigError::NoServices);
        }

        let mut services = Vec::with_capacity(config.services.len());
        for service_config in &config.services {
            let key = ServiceKey::load_pem_file(&service_config.key).map_err(|source| {
                ConfigError::Key {
                    path: service_config.key.clone(),
                    source,
                }
            })?;
            debug!(
                "Loaded private key for service {}.onion.",
                key.onion_address()
            );

            let instances: Vec<Instance> = service_config
                .instances
                .iter()
                .map(|i| Instance::new(i.address.clone(), i.auth.clone()))
                .collect();
            let service = Service::new(key, instances)?;
            info!(
                "Loaded {} instances for service {}.onion.",
                service.instances().len(),
                service.onion_address()
            );
            services.push(Mutex::new(service));
        }

        Ok(Balancer {
            transport,
            config,
            services,
            ring: Mutex::new(ConsensusRing::new()),
        })
    }

    /// The configuration this balancer was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lock and return service number `index`, for inspection.
    pub fn service(&self, index: usize) -> MutexGuard<'_, Service> {
        self.services[index].lock().expect("poisoned lock")
    }

    /// Request a fresh descriptor for every configured instance.
    ///
    /// Results arrive later through
    /// [`handle_descriptor_content`](Balancer::handle_descriptor_content);
    /// an instance whose fetch request is rejected outright is marked
    /// unreachable until one does.
    pub fn fetch_instance_descriptors(&self) {
        info!("Initiating fetch of descriptors for all service instances.");
        for service in &self.services {
            let mut service = service.lock().expect("poisoned lock");
            for instance in service.instances_mut() {
                match self.transport.fetch_descriptor(instance.onion_address()) {
                    Ok(()) => {
                        debug!(
                            "Trying to fetch a descriptor for instance {}.onion.",
                            instance.onion_address()
                        );
                    }
                    Err(e) => {
                        instance.mark_unreachable();
                        warn!(
                            "No descriptor received for instance {}.onion, the \
                             instance may be offline: {}",
                            instance.onion_address(),
                            e
                        );
                    }
                }
            }
        }
    }

    /// Evaluate the publish state machine for every service.
    pub fn publish_all_descriptors(&self) {
        debug!("Checking if any master descriptors should be published.");

        let mut ring = self.ring.lock().expect("poisoned lock");
        if ring.is_empty() && self.config.distinct_descriptors {
            // Distinct mode needs responsible-HSDir lookups; try to
            // get a consensus before the services ask for one.
            self.refresh_ring(&mut ring);
        }

        let now = SystemTime::now();
        let mut rng = rand::rng();
        for service in &self.services {
            service.lock().expect("poisoned lock").consider_publish(
                &mut rng,
                &*self.transport,
                &ring,
                &self.config,
                false,
                now,
            );
        }
    }

    /// Replace the HSDir ring from a fresh consensus.
    ///
    /// Call this whenever the embedding binary learns that Tor has a
    /// new network status.
    pub fn refresh_consensus(&self) {
        let mut ring = self.ring.lock().expect("poisoned lock");
        self.refresh_ring(&mut ring);
    }

    /// Fetch router statuses and rebuild `ring` from them.
    fn refresh_ring(&self, ring: &mut ConsensusRing) {
        match self.transport.router_statuses() {
            Ok(statuses) => ring.refresh(&statuses),
            Err(e) => warn!("Could not load consensus from Tor: {}", e),
        }
    }

    /// Log an informational descriptor event from the transport.
    pub fn handle_descriptor_event(&self, summary: &str) {
        debug!("Received new descriptor event: {}", summary);
    }

    /// Ingest the content of a fetched descriptor.
    ///
    /// `address` is the transport's claim about whose descriptor this
    /// is, used for logging only; routing trusts the permanent key
    /// embedded in (and signing) the descriptor itself. Near-empty
    /// payloads mean "the directory had nothing" and are ignored.
    pub fn handle_descriptor_content(&self, address: &str, content: &[u8]) {
        if content.len() < MIN_DESCRIPTOR_LEN {
            debug!("Empty descriptor received for {}.onion.", address);
            return;
        }
        let text = match std::str::from_utf8(content) {
            Ok(text) => text,
            Err(_) => {
                warn!("Received a descriptor that is not valid UTF-8.");
                return;
            }
        };
        let descriptor = match parse_instance_descriptor(text) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Received an invalid service descriptor: {}", e);
                return;
            }
        };

        let now = SystemTime::now();
        for service in &self.services {
            let mut service = service.lock().expect("poisoned lock");
            for instance in service.instances_mut() {
                if instance.onion_address() == descriptor.onion_address {
                    instance.update_descriptor(&descriptor, now);
                    return;
                }
            }
        }

        debug!("Received a descriptor for an unknown service:\n{}", text);
        warn!(
            "Received a descriptor with address {}.onion that did not match \
             any configured service instances.",
            descriptor.onion_address
        );
    }

    /// Render the status summary.
    pub fn status_report(&self) -> String {
        status::render_report(&self.services)
    }

    /// Run the balancer until `shutdown` is set.
    ///
    /// Registers the periodic fetch and publish-check jobs, staggers
    /// their first runs by the configured initial delay, and then
    /// drives them on the calling thread. If a status socket is
    /// configured, it is served for as long as the balancer runs; an
    /// unbindable socket is logged and skipped rather than treated as
    /// fatal.
    pub fn run(self: &Arc<Self>, shutdown: &AtomicBool) -> Result<(), ConfigError> {
        #[cfg(unix)]
        let _status_socket = self.config.status_socket_location.as_ref().and_then(|path| {
            match StatusSocket::spawn(Arc::clone(self), path.clone()) {
                Ok(socket) => Some(socket),
                Err(e) => {
                    warn!("Could not create status socket at {:?}: {}", path, e);
                    None
                }
            }
        });

        let mut scheduler = Scheduler::new();

        let balancer = Arc::clone(self);
        scheduler.add_job(
            "fetch-instance-descriptors",
            self.config.refresh_interval,
            move || balancer.fetch_instance_descriptors(),
        );
        let balancer = Arc::clone(self);
        scheduler.add_job(
            "publish-check",
            self.config.publish_check_interval,
            move || balancer.publish_all_descriptors(),
        );

        scheduler.run_all(self.config.initial_delay);
        scheduler.run_forever(Duration::from_secs(1), shutdown)
    }
}
