//! Status reporting over a Unix domain socket.
//!
//! Connecting to the socket (e.g. with
//! `socat - unix-connect:/var/run/obalance/control`) returns a short
//! plain-text summary and closes the connection:
//!
//! ```text
//! uweyln7jhkyaokka.onion 2016-05-01 11:08:56
//!   r523s7jx65ckitf4.onion [offline]
//!   v2q7ujuleky7odph.onion 2016-05-01 11:00:00 3 IPs
//! ```

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::SystemTime;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::warn;

use crate::service::Service;

/// Wall-clock format used in the report.
const STATUS_TIME_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Render `when` for the report, if it is representable.
fn format_timestamp(when: SystemTime) -> Option<String> {
    OffsetDateTime::from(when).format(STATUS_TIME_FORMAT).ok()
}

/// Render the status summary for a set of services.
///
/// Takes each service's lock in turn; the snapshot is consistent per
/// service, not across services.
pub(crate) fn render_report(services: &[Mutex<Service>]) -> String {
    let mut report = String::new();
    for service in services {
        let Ok(service) = service.lock() else {
            // A poisoned service can't be reported on, but the report
            // itself should still come out.
            warn!("Skipping a poisoned service lock in the status report.");
            continue;
        };
        let uploaded = service
            .last_uploaded()
            .and_then(format_timestamp)
            .unwrap_or_else(|| "[not uploaded]".to_owned());
        let _ = writeln!(report, "{}.onion {}", service.onion_address(), uploaded);

        for instance in service.instances() {
            match instance.descriptor_timestamp().and_then(format_timestamp) {
                None => {
                    let _ = writeln!(report, "  {}.onion [offline]", instance.onion_address());
                }
                Some(timestamp) => {
                    let _ = writeln!(
                        report,
                        "  {}.onion {} {} IPs",
                        instance.onion_address(),
                        timestamp,
                        instance.intro_points().len()
                    );
                }
            }
        }
    }
    report
}

/// The Unix-socket status server.
#[cfg(unix)]
pub use socket::StatusSocket;

#[cfg(unix)]
mod socket {
    //! The listener side of the status interface.

    use std::io::Write as _;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tracing::{debug, warn};

    use crate::Balancer;

    /// A Unix domain socket that emits the status summary to every
    /// connection.
    ///
    /// The listener runs on its own thread and reads service state
    /// under the same per-service locks as everything else.
    #[derive(Debug)]
    pub struct StatusSocket {
        /// Where the socket file lives.
        path: PathBuf,
        /// Tells the listener thread to stop serving.
        shutdown: Arc<AtomicBool>,
        /// The listener thread, until [`close`](StatusSocket::close)
        /// reaps it.
        handle: Option<std::thread::JoinHandle<()>>,
    }

    impl StatusSocket {
        /// Bind the status socket at `path` and start serving.
        ///
        /// A stale socket file from a previous run is removed first.
        pub fn spawn(balancer: Arc<Balancer>, path: PathBuf) -> std::io::Result<Self> {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }

            debug!("Creating status socket at {:?}.", path);
            let listener = std::os::unix::net::UnixListener::bind(&path)?;
            let shutdown = Arc::new(AtomicBool::new(false));

            let thread_shutdown = Arc::clone(&shutdown);
            let handle = std::thread::Builder::new()
                .name("obalance-status".to_owned())
                .spawn(move || {
                    for stream in listener.incoming() {
                        if thread_shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        match stream {
                            Ok(mut stream) => {
                                let report = balancer.status_report();
                                if let Err(e) = stream.write_all(report.as_bytes()) {
                                    warn!("Error writing status report: {}", e);
                                }
                            }
                            Err(e) => {
                                warn!("Error accepting status connection: {}", e);
                            }
                        }
                    }
                })?;

            Ok(StatusSocket {
                path,
                shutdown,
                handle: Some(handle),
            })
        }

        /// Stop serving, wait for the listener thread to exit, and
        /// remove the socket file.
        pub fn close(&mut self) {
            self.shutdown.store(true, Ordering::Relaxed);
            if let Some(handle) = self.handle.take() {
                // The listener sits blocked in accept; connecting to
                // it ourselves makes it wake up and see the flag.
                let _ = std::os::unix::net::UnixStream::connect(&self.path);
                let _ = handle.join();
            }
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Error removing the status socket: {}", e);
                }
            }
        }
    }

    impl Drop for StatusSocket {
        fn drop(&mut self) {
            self.close();
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
    use std::time::{Duration, UNIX_EPOCH};

    use obalance_crypto::testing::TEST_KEY_PEM;
    use obalance_crypto::ServiceKey;
    use obalance_netdoc::{InstanceDescriptor, IntroPoint};

    use crate::instance::Instance;

    #[test]
    fn timestamp_format() {
        let when = UNIX_EPOCH + Duration::from_secs(1_435_233_021);
        assert_eq!(
            format_timestamp(when).unwrap(),
            "2015-06-25 11:50:21"
        );
    }

    #[test]
    fn report_shape() {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        let when = UNIX_EPOCH + Duration::from_secs(1_435_233_021);

        let mut fed = Instance::new("v2q7ujuleky7odph", None);
        let points = (0..3)
            .map(|n| {
                IntroPoint::new(
                    format!("point{}", n),
                    "203.0.113.1".parse::<IpAddr>().unwrap(),
                    9001,
                    "",
                    "",
                )
            })
            .collect();
        fed.update_descriptor(
            &InstanceDescriptor::new(key.public().clone(), when, points),
            when,
        );

        let offline = Instance::new("r523s7jx65ckitf4", None);
        let service = Service::new(key, vec![offline, fed]).unwrap();
        let services = vec![Mutex::new(service)];

        assert_eq!(
            render_report(&services),
            "jyvfq5umznvka34v.onion [not uploaded]\n\
             \u{20} r523s7jx65ckitf4.onion [offline]\n\
             \u{20} v2q7ujuleky7odph.onion 2015-06-25 11:50:21 3 IPs\n"
        );
    }

    #[test]
    fn poisoned_service_is_skipped() {
        let key = ServiceKey::from_pem(TEST_KEY_PEM).unwrap();
        let poisoned = Service::new(key.clone(), vec![Instance::new("deadbeef", None)]).unwrap();
        let healthy = Service::new(key, vec![Instance::new("r523s7jx65ckitf4", None)]).unwrap();
        let services = vec![Mutex::new(poisoned), Mutex::new(healthy)];

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = services[0].lock().unwrap();
            panic!("poison the first service's lock");
        }));
        assert!(caught.is_err());
        assert!(services[0].lock().is_err());

        // The healthy service is still reported.
        assert_eq!(
            render_report(&services),
            "jyvfq5umznvka34v.onion [not uploaded]\n\
             \u{20} r523s7jx65ckitf4.onion [offline]\n"
        );
    }
}
