//! Weighted selection without replacement.
//!
//! A draw walks the non-excluded candidates in pool order, subtracting each
//! weight from a uniform value in `[0, total)` and picking the first candidate
//! where the remainder drops to zero or below. Given the same draw source the
//! result is fully reproducible.

use crate::model::{Challenge, ClassName};
use rand::{Rng, RngCore};
use std::collections::HashSet;

/// Uniform random values in `[0, 1)`.
pub trait DrawSource {
    fn next_unit(&mut self) -> f64;
}

impl<R: RngCore> DrawSource for R {
    fn next_unit(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

/// An entry of a candidate pool. Unweighted pools use the default weight of 1.
pub trait Candidate {
    fn key(&self) -> &str;

    fn weight(&self) -> u32 {
        1
    }
}

impl Candidate for ClassName {
    fn key(&self) -> &str {
        self.as_str()
    }
}

impl Candidate for String {
    fn key(&self) -> &str {
        self.as_str()
    }
}

impl Candidate for Challenge {
    fn key(&self) -> &str {
        &self.id
    }

    fn weight(&self) -> u32 {
        self.weight
    }
}

/// Draw one index from `pool`, skipping candidates whose key is in `excluded`.
///
/// Returns `None` when nothing selectable remains. That is pool exhaustion,
/// not a failure.
pub fn select<C, S>(pool: &[C], excluded: &HashSet<&str>, source: &mut S) -> Option<usize>
where
    C: Candidate,
    S: DrawSource + ?Sized,
{
    let eligible = |c: &C| c.weight() > 0 && !excluded.contains(c.key());

    let total: u64 = pool
        .iter()
        .filter(|c| eligible(c))
        .map(|c| u64::from(c.weight()))
        .sum();
    if total == 0 {
        return None;
    }

    let mut remainder = source.next_unit() * total as f64;
    let mut last = None;
    for (idx, c) in pool.iter().enumerate() {
        if !eligible(c) {
            continue;
        }
        remainder -= f64::from(c.weight());
        if remainder <= 0.0 {
            return Some(idx);
        }
        last = Some(idx);
    }
    // Only reachable through float rounding at the upper edge.
    last
}

/// Convenience wrapper over [`select`] returning the candidate itself.
pub fn pick<'a, C, S>(pool: &'a [C], excluded: &HashSet<&str>, source: &mut S) -> Option<&'a C>
where
    C: Candidate,
    S: DrawSource + ?Sized,
{
    select(pool, excluded, source).map(|idx| &pool[idx])
}

/// Replays a fixed list of unit values. Used to steer draws in tests.
#[cfg(test)]
pub(crate) struct ScriptedDraws {
    values: std::collections::VecDeque<f64>,
}

#[cfg(test)]
impl ScriptedDraws {
    pub(crate) fn new(values: &[f64]) -> Self {
        Self {
            values: values.iter().copied().collect(),
        }
    }

    /// Unit value that lands in the middle of `target`'s weight interval.
    pub(crate) fn unit_for<C: Candidate>(pool: &[C], excluded: &HashSet<&str>, target: &str) -> f64 {
        let eligible: Vec<&C> = pool
            .iter()
            .filter(|c| c.weight() > 0 && !excluded.contains(c.key()))
            .collect();
        let total: u64 = eligible.iter().map(|c| u64::from(c.weight())).sum();
        let mut before = 0u64;
        for c in eligible {
            if c.key() == target {
                return (before as f64 + f64::from(c.weight()) / 2.0) / total as f64;
            }
            before += u64::from(c.weight());
        }
        panic!("{target} is not selectable");
    }
}

#[cfg(test)]
impl DrawSource for ScriptedDraws {
    fn next_unit(&mut self) -> f64 {
        self.values.pop_front().expect("scripted draws exhausted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn challenge(id: &str, weight: u32) -> Challenge {
        Challenge {
            id: id.into(),
            text: id.to_uppercase(),
            description: String::new(),
            weight,
        }
    }

    #[test]
    fn empty_remainder_reports_exhaustion() {
        let pool = vec![challenge("a", 1), challenge("b", 2)];
        let excluded: HashSet<&str> = ["a", "b"].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(select(&pool, &excluded, &mut rng), None);
        assert_eq!(select::<Challenge, _>(&[], &HashSet::new(), &mut rng), None);
    }

    #[test]
    fn boundary_goes_to_first_crossed_candidate() {
        let pool = vec![challenge("a", 1), challenge("b", 3)];
        let none = HashSet::new();
        // 0.25 * 4 = 1.0 -> remainder hits exactly 0 on "a".
        let mut src = ScriptedDraws::new(&[0.0, 0.25, 0.2501, 0.999]);
        assert_eq!(select(&pool, &none, &mut src), Some(0));
        assert_eq!(select(&pool, &none, &mut src), Some(0));
        assert_eq!(select(&pool, &none, &mut src), Some(1));
        assert_eq!(select(&pool, &none, &mut src), Some(1));
    }

    #[test]
    fn excluded_candidates_are_never_drawn() {
        let pool = vec![challenge("a", 5), challenge("b", 1), challenge("c", 5)];
        let excluded: HashSet<&str> = ["a", "c"].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000 {
            assert_eq!(select(&pool, &excluded, &mut rng), Some(1));
        }
    }

    #[test]
    fn zero_weight_entries_are_skipped() {
        let pool = vec![challenge("a", 0), challenge("b", 1)];
        let mut src = ScriptedDraws::new(&[0.0]);
        assert_eq!(pick(&pool, &HashSet::new(), &mut src).map(|c| c.id.as_str()), Some("b"));
    }

    #[test]
    fn unweighted_pool_is_uniform() {
        let pool: Vec<ClassName> = ClassName::ALL.to_vec();
        let mut rng = StdRng::seed_from_u64(1);
        let mut counts = [0usize; 7];
        let n = 70_000;
        for _ in 0..n {
            counts[select(&pool, &HashSet::new(), &mut rng).unwrap()] += 1;
        }
        for count in counts {
            let freq = count as f64 / n as f64;
            assert!((freq - 1.0 / 7.0).abs() < 0.01, "frequency {freq}");
        }
    }

    #[test]
    fn frequencies_converge_to_weights() {
        let pool = vec![
            challenge("a", 1),
            challenge("b", 2),
            challenge("c", 3),
            challenge("d", 4),
        ];
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let n = 200_000;
        let mut counts = [0usize; 4];
        for _ in 0..n {
            counts[select(&pool, &HashSet::new(), &mut rng).unwrap()] += 1;
        }
        for (idx, count) in counts.iter().enumerate() {
            let expected = pool[idx].weight as f64 / 10.0;
            let freq = *count as f64 / n as f64;
            // ~5 standard errors at n = 200k.
            assert!(
                (freq - expected).abs() < 0.006,
                "candidate {idx}: got {freq}, expected {expected}"
            );
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let pool = vec![challenge("a", 1), challenge("b", 2), challenge("c", 3)];
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50)
                .map(|_| select(&pool, &HashSet::new(), &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
    }
}
