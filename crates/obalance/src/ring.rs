//! The ring of hidden service directories.
//!
//! Responsibility for a descriptor is positional: the descriptor ID is
//! treated as a point on the same circular keyspace as the HSDir
//! fingerprints, and the `hsdir_set` directories whose fingerprints
//! follow it (wrapping at the top) are responsible for storing it.

use tracing::debug;

use obalance_crypto::DescriptorId;

use crate::ctrl::RouterStatus;
use crate::err::Error;

/// The sorted set of HSDir fingerprints from the latest consensus.
///
/// Refreshed wholesale; never partially mutated.
#[derive(Clone, Debug, Default)]
pub struct ConsensusRing {
    /// HSDir fingerprints (uppercase hex), sorted ascending.
    ring: Vec<String>,
}

impl ConsensusRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        ConsensusRing::default()
    }

    /// Replace the ring contents from a consensus router list.
    ///
    /// Only routers carrying the HSDir flag participate.
    pub fn refresh(&mut self, statuses: &[RouterStatus]) {
        let mut ring: Vec<String> = statuses
            .iter()
            .filter(|status| status.hs_dir)
            .map(|status| status.fingerprint.clone())
            .collect();
        ring.sort();
        debug!("Updated the list of hidden service directories: {} HSDirs.", ring.len());
        self.ring = ring;
    }

    /// True if we have no consensus information.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Return the HSDirs responsible for storing `desc_id`.
    ///
    /// Walks the ring from the descriptor ID's position, wrapping at
    /// the end, and stops early rather than return any fingerprint
    /// twice. The result is therefore at most
    /// `min(set_size, ring length)` entries.
    pub fn responsible_hsdirs(
        &self,
        desc_id: &DescriptorId,
        set_size: usize,
    ) -> Result<Vec<String>, Error> {
        if self.ring.is_empty() {
            return Err(Error::NoConsensus);
        }

        let key = desc_id.to_fingerprint();
        let pos = self.ring.partition_point(|fp| fp.as_str() < key.as_str());
        let pos = pos % self.ring.len();

        Ok(self.ring[pos..]
            .iter()
            .chain(&self.ring[..pos])
            .take(set_size)
            .cloned()
            .collect())
    }
}
