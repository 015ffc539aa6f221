//! The priority sampler (§4.1). Builds one ordering of job-type key tuples per fetch attempt:
//! a weighted random permutation where the probability of a tuple landing at position *i* is
//! proportional to its priority among the tuples not yet placed.
//!
//! Uses the Efraimidis-Spirakis algorithm (weighted reservoir sampling without replacement): for
//! each item draw `key = u.powf(1.0 / weight)` from a fresh uniform `u`, then sort descending by
//! key. That single sort produces the desired weighted permutation in O(N log N) without the
//! O(N^2) cost of repeatedly renormalizing a shrinking weight pool.

use rand::Rng;

use crate::keys::{JobTypeKeys, Keys};

pub struct SampledJobType {
    pub name: String,
    pub keys: JobTypeKeys,
}

/// Produces one fetch attempt's worth of ordering over `job_types`, resampled fresh every call
/// as the spec requires (no cached permutation reused across fetches).
pub fn sample(keys: &Keys, pool_id: &str, job_types: &[(String, u32)]) -> Vec<SampledJobType> {
    sample_with_rng(keys, pool_id, job_types, &mut rand::thread_rng())
}

pub fn sample_with_rng(
    keys: &Keys,
    pool_id: &str,
    job_types: &[(String, u32)],
    rng: &mut impl Rng,
) -> Vec<SampledJobType> {
    let mut weighted: Vec<(f64, &str)> = job_types
        .iter()
        .map(|(name, priority)| {
            let weight = (*priority).max(1) as f64;
            let u: f64 = rng.gen_range(f64::EPSILON..1.0);
            let sort_key = u.powf(1.0 / weight);
            (sort_key, name.as_str())
        })
        .collect();

    // Descending: the larger the key, the earlier it's placed, matching higher-priority types
    // winning more draws.
    weighted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    weighted
        .into_iter()
        .map(|(_, name)| SampledJobType {
            name: name.to_string(),
            keys: keys.job_type_keys(name, pool_id),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_job_type_appears_exactly_once() {
        let keys = Keys::new("ns");
        let types = vec![
            ("a".to_string(), 1),
            ("b".to_string(), 50),
            ("c".to_string(), 100),
        ];
        let sampled = sample(&keys, "pool-1", &types);
        assert_eq!(sampled.len(), 3);
        let mut names: Vec<_> = sampled.iter().map(|s| s.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn higher_priority_wins_first_position_more_often() {
        let keys = Keys::new("ns");
        let types = vec![("low".to_string(), 1), ("high".to_string(), 1000)];

        let mut rng = rand::thread_rng();
        let mut high_first = 0;
        let trials = 2000;
        for _ in 0..trials {
            let sampled = sample_with_rng(&keys, "pool-1", &types, &mut rng);
            if sampled[0].name == "high" {
                high_first += 1;
            }
        }

        // Not a tight statistical bound, just a sanity check that priority actually matters.
        assert!(
            high_first > trials * 3 / 4,
            "expected high-priority type to win most draws, got {}/{}",
            high_first,
            trials
        );
    }

    #[test]
    fn empty_job_types_yields_empty_sample() {
        let keys = Keys::new("ns");
        assert!(sample(&keys, "pool-1", &[]).is_empty());
    }
}
