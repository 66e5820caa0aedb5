//! Fair selection of introduction points across backend instances.

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use obalance_netdoc::IntroPoint;

/// Select up to `max_intro_points` introduction points from the
/// per-instance pools in `pools`.
///
/// Quotas are assigned round-robin, one point per instance per pass,
/// skipping instances whose pool is exhausted, so that the selection is
/// spread across the backends as evenly as possible instead of
/// draining the first pool found. Each instance's quota is then drawn
/// uniformly without replacement from its pool, and the combined
/// result is shuffled so the published ordering reveals nothing about
/// which instance contributed which point.
///
/// The caller is expected to have shuffled the pool order already;
/// quota assignment starts from index 0, so a fixed order would bias
/// the odd remainder toward the earlier instances.
///
/// Requesting more than is available clamps to what is available;
/// all-empty pools yield an empty selection. Neither is an error.
pub fn choose_intro_points<R: Rng + ?Sized>(
    rng: &mut R,
    pools: &[Vec<IntroPoint>],
    max_intro_points: usize,
) -> Vec<IntroPoint> {
    let available: Vec<usize> = pools.iter().map(Vec::len).collect();
    let total: usize = available.iter().sum();
    let target = total.min(max_intro_points);
    if target == 0 {
        return Vec::new();
    }

    let mut quota = vec![0_usize; pools.len()];
    let mut assigned = 0;
    let mut pos = 0;
    while assigned < target {
        if available[pos] > quota[pos] {
            quota[pos] += 1;
            assigned += 1;
        }
        pos = (pos + 1) % pools.len();
    }

    let mut selected: Vec<IntroPoint> = Vec::with_capacity(target);
    for (pool, &count) in pools.iter().zip(&quota) {
        selected.extend(pool.choose_multiple(rng, count).cloned());
    }
    selected.shuffle(rng);
    selected
}
