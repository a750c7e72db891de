//! Per-proxy round-robin over a caller-supplied country list
//!
//! Each proxy id owns a queue holding a random permutation of the list.
//! Picks pop from the head, so no country repeats until every other one
//! has been handed out; an empty queue is refilled with a new permutation.
//! State is process-local and lost on restart.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
pub struct CountryRotation {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
}

impl CountryRotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next country for `proxy`, or `None` if `countries` is empty
    pub fn next(&self, proxy: &str, countries: &[String]) -> Option<String> {
        self.next_with_rng(proxy, countries, &mut rand::thread_rng())
    }

    pub fn next_with_rng<R: Rng + ?Sized>(&self, proxy: &str, countries: &[String], rng: &mut R) -> Option<String> {
        if countries.is_empty() {
            return None;
        }

        let mut queues = self.queues.lock();
        let queue = queues.entry(proxy.to_string()).or_default();
        if queue.is_empty() {
            let mut permutation = countries.to_vec();
            permutation.shuffle(rng);
            queue.extend(permutation);
        }
        queue.pop_front()
    }

    /// Countries still queued for `proxy` before the next reshuffle
    #[cfg(test)]
    fn remaining(&self, proxy: &str) -> usize {
        self.queues.lock().get(proxy).map_or(0, VecDeque::len)
    }
}

/// Split a comma separated list of country codes, dropping blanks
pub fn parse_country_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn list(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn full_cycle_has_no_repeats() {
        let rotation = CountryRotation::new();
        let countries = list(&["US", "GB", "DE"]);
        let mut rng = StdRng::seed_from_u64(7);

        let picked: HashSet<String> = (0..3)
            .map(|_| rotation.next_with_rng("p1", &countries, &mut rng).unwrap())
            .collect();
        assert_eq!(picked.len(), 3);
        assert_eq!(rotation.remaining("p1"), 0);

        // Fourth pick starts a new permutation
        let fourth = rotation.next_with_rng("p1", &countries, &mut rng).unwrap();
        assert!(countries.contains(&fourth));
        assert_eq!(rotation.remaining("p1"), 2);
    }

    #[test]
    fn proxies_rotate_independently() {
        let rotation = CountryRotation::new();
        let countries = list(&["US", "GB"]);

        rotation.next("a", &countries).unwrap();
        assert_eq!(rotation.remaining("a"), 1);
        assert_eq!(rotation.remaining("b"), 0);

        rotation.next("b", &countries).unwrap();
        rotation.next("b", &countries).unwrap();
        assert_eq!(rotation.remaining("a"), 1);
        assert_eq!(rotation.remaining("b"), 0);
    }

    #[test]
    fn single_country_always_returned() {
        let rotation = CountryRotation::new();
        let countries = list(&["VN"]);
        for _ in 0..5 {
            assert_eq!(rotation.next("p", &countries).as_deref(), Some("VN"));
        }
    }

    #[test]
    fn empty_list_yields_nothing() {
        let rotation = CountryRotation::new();
        assert_eq!(rotation.next("p", &[]), None);
    }

    #[test]
    fn parses_and_trims_list() {
        assert_eq!(parse_country_list("US, GB,,DE ,"), list(&["US", "GB", "DE"]));
        assert!(parse_country_list(" , ").is_empty());
    }
}
