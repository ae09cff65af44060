use crate::session::OrderPolicy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Realizes the stimulus order for a session.
///
/// Returns the ordered words and the seed actually used (`None` for fixed order).
/// A seeded policy without a seed draws one so the order can still be reproduced.
pub fn realize_order(
    words: &[String],
    policy: OrderPolicy,
    seed: Option<u64>,
) -> (Vec<String>, Option<u64>) {
    match policy {
        OrderPolicy::Fixed => (words.to_vec(), None),
        OrderPolicy::Seeded => {
            let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
            let mut rng = StdRng::seed_from_u64(seed);
            let mut order = words.to_vec();
            order.shuffle(&mut rng);
            (order, Some(seed))
        }
    }
}
