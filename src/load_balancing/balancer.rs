//! # Load Balancer Module
//!
//! Four selection strategies behind one small trait:
//!
//! 1. **Round Robin**: atomic counter modulo pool size.
//! 2. **Weighted Round Robin**: the smooth (nginx) algorithm — weights
//!    spread across the cycle instead of bursting.
//! 3. **Least Connections**: routes to the entry with the fewest in-flight
//!    requests, tracked by per-entry atomic counters.
//! 4. **Consistent Hash**: virtual-node ring keyed by a request attribute,
//!    for session affinity with minimal remapping on pool changes.
//!
//! Balancers are built from a fixed backend sequence. Pool membership never
//! changes after construction; the router's hot-reload path replaces whole
//! balancers instead.

use crate::core::config::{BackendSpec, Strategy};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A stateful backend selector over a fixed pool.
///
/// `pick` returns `None` only for an empty pool. Callers that may abandon a
/// pick (health filter, circuit rejection) must pair every `pick` with
/// exactly one `release`; strategies that don't track in-flight work accept
/// the call as a no-op.
pub trait Balancer: Send + Sync {
    /// Select a backend. `key` is the routing-affinity key; only the
    /// consistent-hash strategy reads it.
    fn pick(&self, key: &str) -> Option<String>;

    /// Signal that work handed out by a previous `pick` has finished.
    fn release(&self, _backend: &str) {}

    /// Strategy name for logs and metrics.
    fn name(&self) -> &'static str;
}

/// Round-robin selection with a single atomic counter.
pub struct RoundRobin {
    backends: Vec<String>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new(backends: Vec<String>) -> Self {
        Self {
            backends,
            counter: AtomicUsize::new(0),
        }
    }
}

impl Balancer for RoundRobin {
    fn pick(&self, _key: &str) -> Option<String> {
        if self.backends.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.backends.len();
        Some(self.backends[idx].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// A backend paired with its configured weight.
#[derive(Debug, Clone)]
pub struct WeightedBackend {
    pub addr: String,
    pub weight: i32,
}

struct WeightedSlot {
    addr: String,
    weight: i64,
    current: i64,
}

/// Smooth weighted round robin.
///
/// Each pick, under one mutex:
/// 1. add every slot's fixed weight to its current weight;
/// 2. select the slot with the highest current weight (ties: lowest index);
/// 3. subtract the total weight from the winner.
///
/// For weights {A:2, B:1} the sequence is A, B, A, A, B, A, … — the naive
/// repeat-N scheme would burst A, A, B instead.
pub struct WeightedRoundRobin {
    slots: Mutex<Vec<WeightedSlot>>,
    total_weight: i64,
}

impl WeightedRoundRobin {
    /// Backends with weight <= 0 default to 1.
    pub fn new(backends: Vec<WeightedBackend>) -> Self {
        let mut total = 0i64;
        let slots = backends
            .into_iter()
            .map(|b| {
                let weight = if b.weight <= 0 { 1 } else { i64::from(b.weight) };
                total += weight;
                WeightedSlot {
                    addr: b.addr,
                    weight,
                    current: 0,
                }
            })
            .collect();

        Self {
            slots: Mutex::new(slots),
            total_weight: total,
        }
    }
}

impl Balancer for WeightedRoundRobin {
    fn pick(&self, _key: &str) -> Option<String> {
        let mut slots = self.slots.lock();
        if slots.is_empty() {
            return None;
        }

        let mut best = 0;
        for i in 0..slots.len() {
            slots[i].current += slots[i].weight;
            if slots[i].current > slots[best].current {
                best = i;
            }
        }
        slots[best].current -= self.total_weight;

        Some(slots[best].addr.clone())
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

struct ConnEntry {
    addr: String,
    active: AtomicI64,
}

/// Least-connections selection.
///
/// `pick` scans for the lowest active count (ties: lowest index) and
/// increments the winner; `release` decrements. Unpaired calls leak the
/// counter and make a backend look permanently busy, so the pipeline
/// releases every pick it abandons. A transiently negative count is an
/// inconsistency signal, not an error.
pub struct LeastConnections {
    entries: Vec<ConnEntry>,
}

impl LeastConnections {
    pub fn new(backends: Vec<String>) -> Self {
        Self {
            entries: backends
                .into_iter()
                .map(|addr| ConnEntry {
                    addr,
                    active: AtomicI64::new(0),
                })
                .collect(),
        }
    }

    /// Current in-flight count for a backend, for observability and tests.
    pub fn active(&self, backend: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.addr == backend)
            .map(|e| e.active.load(Ordering::Relaxed))
    }
}

impl Balancer for LeastConnections {
    fn pick(&self, _key: &str) -> Option<String> {
        let first = self.entries.first()?;

        let mut best = 0;
        let mut best_count = first.active.load(Ordering::Relaxed);
        for (i, entry) in self.entries.iter().enumerate().skip(1) {
            let count = entry.active.load(Ordering::Relaxed);
            if count < best_count {
                best_count = count;
                best = i;
            }
        }

        self.entries[best].active.fetch_add(1, Ordering::Relaxed);
        Some(self.entries[best].addr.clone())
    }

    fn release(&self, backend: &str) {
        if let Some(entry) = self.entries.iter().find(|e| e.addr == backend) {
            entry.active.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

/// Consistent-hash ring over virtual nodes.
///
/// Each backend contributes `replicas` points on a 32-bit ring, hashed with
/// CRC32 over `"{addr}-{i}"`. A key maps to the first ring point at or past
/// its own hash, wrapping to the start. Adding one backend to a pool of N
/// remaps roughly 1/(N+1) of keys.
pub struct ConsistentHash {
    ring: Vec<u32>,
    nodes: HashMap<u32, String>,
    replicas: usize,
}

impl ConsistentHash {
    /// 150 replicas per backend gives good distribution for typical pools.
    pub fn new(replicas: usize, backends: Vec<String>) -> Self {
        let replicas = replicas.max(1);
        let mut ring = Vec::with_capacity(replicas * backends.len());
        let mut nodes = HashMap::with_capacity(replicas * backends.len());

        for addr in &backends {
            for i in 0..replicas {
                let h = crc32fast::hash(format!("{addr}-{i}").as_bytes());
                ring.push(h);
                nodes.insert(h, addr.clone());
            }
        }
        ring.sort_unstable();

        Self {
            ring,
            nodes,
            replicas,
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

impl Balancer for ConsistentHash {
    fn pick(&self, key: &str) -> Option<String> {
        if self.ring.is_empty() {
            return None;
        }

        let h = crc32fast::hash(key.as_bytes());

        // First ring point >= h, wrapping past the end back to index 0.
        let mut idx = self.ring.partition_point(|&point| point < h);
        if idx == self.ring.len() {
            idx = 0;
        }

        self.nodes.get(&self.ring[idx]).cloned()
    }

    fn name(&self) -> &'static str {
        "consistent_hash"
    }
}

/// Build a balancer for a route's backend pool. Called at router build time,
/// so hot reload replaces balancers wholesale.
pub fn build_balancer(
    strategy: Strategy,
    replicas: usize,
    backends: &[BackendSpec],
) -> Arc<dyn Balancer> {
    let urls: Vec<String> = backends.iter().map(|b| b.url().to_string()).collect();

    match strategy {
        Strategy::RoundRobin => Arc::new(RoundRobin::new(urls)),
        Strategy::WeightedRoundRobin => {
            let weighted = backends
                .iter()
                .map(|b| WeightedBackend {
                    addr: b.url().to_string(),
                    weight: b.weight(),
                })
                .collect();
            Arc::new(WeightedRoundRobin::new(weighted))
        }
        Strategy::LeastConnections => Arc::new(LeastConnections::new(urls)),
        Strategy::ConsistentHash => Arc::new(ConsistentHash::new(replicas, urls)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    fn pool() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    }

    // --- Round robin ---

    #[test]
    fn round_robin_cycles_in_order() {
        let rr = RoundRobin::new(pool());
        for i in 0..9 {
            assert_eq!(rr.pick("").unwrap(), pool()[i % 3]);
        }
    }

    #[test]
    fn round_robin_exact_distribution() {
        let rr = RoundRobin::new(pool());
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..300 {
            *counts.entry(rr.pick("").unwrap()).or_default() += 1;
        }
        for backend in pool() {
            assert_eq!(counts[&backend], 100, "backend {backend}");
        }
    }

    #[test]
    fn round_robin_concurrent_distribution() {
        let rr = Arc::new(RoundRobin::new(pool()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let rr = Arc::clone(&rr);
            handles.push(thread::spawn(move || {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for _ in 0..75 {
                    *counts.entry(rr.pick("").unwrap()).or_default() += 1;
                }
                counts
            }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for (k, v) in handle.join().unwrap() {
                *counts.entry(k).or_default() += v;
            }
        }
        for backend in pool() {
            assert_eq!(counts[&backend], 100, "backend {backend}");
        }
    }

    #[test]
    fn round_robin_empty_pool() {
        let rr = RoundRobin::new(Vec::new());
        assert_eq!(rr.pick(""), None);
    }

    // --- Weighted round robin ---

    fn weighted(pairs: &[(&str, i32)]) -> Vec<WeightedBackend> {
        pairs
            .iter()
            .map(|(addr, weight)| WeightedBackend {
                addr: addr.to_string(),
                weight: *weight,
            })
            .collect()
    }

    #[test]
    fn wrr_is_smooth_not_bursty() {
        let wrr = WeightedRoundRobin::new(weighted(&[("A", 2), ("B", 1)]));
        let picks: Vec<String> = (0..3).map(|_| wrr.pick("").unwrap()).collect();
        assert_eq!(picks, vec!["A", "B", "A"]);
    }

    #[test]
    fn wrr_no_run_longer_than_two_for_two_one() {
        let wrr = WeightedRoundRobin::new(weighted(&[("A", 2), ("B", 1)]));
        let mut run = 0usize;
        let mut prev = String::new();
        for _ in 0..30 {
            let pick = wrr.pick("").unwrap();
            if pick == prev {
                run += 1;
            } else {
                run = 1;
                prev = pick;
            }
            assert!(run <= 2, "run of {run} identical picks");
        }
    }

    #[test]
    fn wrr_exact_distribution() {
        let wrr = WeightedRoundRobin::new(weighted(&[("A", 5), ("B", 1), ("C", 1)]));
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..700 {
            *counts.entry(wrr.pick("").unwrap()).or_default() += 1;
        }
        assert_eq!(counts["A"], 500);
        assert_eq!(counts["B"], 100);
        assert_eq!(counts["C"], 100);
    }

    #[test]
    fn wrr_nonpositive_weight_defaults_to_one() {
        let wrr = WeightedRoundRobin::new(weighted(&[("A", 0), ("B", -3)]));
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..100 {
            *counts.entry(wrr.pick("").unwrap()).or_default() += 1;
        }
        assert_eq!(counts["A"], 50);
        assert_eq!(counts["B"], 50);
    }

    // --- Least connections ---

    #[test]
    fn least_conn_prefers_idle_backend() {
        let lc = LeastConnections::new(pool());
        let first = lc.pick("").unwrap();
        assert_eq!(first, "A");
        // A now has one in-flight; next two picks avoid it.
        assert_eq!(lc.pick("").unwrap(), "B");
        assert_eq!(lc.pick("").unwrap(), "C");
        lc.release(&first);
        assert_eq!(lc.pick("").unwrap(), "A");
    }

    #[test]
    fn least_conn_counts_return_to_zero_after_concurrent_pairing() {
        let lc = Arc::new(LeastConnections::new(pool()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lc = Arc::clone(&lc);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let backend = lc.pick("").unwrap();
                    lc.release(&backend);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for backend in pool() {
            assert_eq!(lc.active(&backend), Some(0), "backend {backend}");
        }
    }

    // --- Consistent hash ---

    #[test]
    fn consistent_hash_is_deterministic() {
        let ch = ConsistentHash::new(150, pool());
        for key in ["alpha", "beta", "gamma", "1.2.3.4"] {
            let first = ch.pick(key).unwrap();
            for _ in 0..10 {
                assert_eq!(ch.pick(key).unwrap(), first, "key {key}");
            }
        }
    }

    #[test]
    fn consistent_hash_remaps_minority_of_keys_on_growth() {
        let before = ConsistentHash::new(150, pool());
        let mut grown = pool();
        grown.push("D".to_string());
        let after = ConsistentHash::new(150, grown);

        let remapped = (0..1000)
            .filter(|i| {
                let key = format!("key-{i}");
                before.pick(&key) != after.pick(&key)
            })
            .count();

        // Expected ≈ 1/4 of keys; anything under half proves stability.
        assert!(remapped < 500, "remapped {remapped} of 1000 keys");
        assert!(remapped > 0, "growing the ring must move some keys");
    }

    #[test]
    fn consistent_hash_empty_ring() {
        let ch = ConsistentHash::new(150, Vec::new());
        assert_eq!(ch.pick("anything"), None);
    }

    #[test]
    fn consistent_hash_replicas_floor_at_one() {
        let ch = ConsistentHash::new(0, pool());
        assert_eq!(ch.replicas(), 1);
        assert!(ch.pick("k").is_some());
    }

    // --- Factory ---

    #[test]
    fn factory_builds_each_strategy() {
        let backends = vec![
            BackendSpec::Url("http://a:1".into()),
            BackendSpec::Weighted {
                url: "http://b:1".into(),
                weight: 3,
            },
        ];
        for (strategy, name) in [
            (Strategy::RoundRobin, "round_robin"),
            (Strategy::WeightedRoundRobin, "weighted_round_robin"),
            (Strategy::LeastConnections, "least_connections"),
            (Strategy::ConsistentHash, "consistent_hash"),
        ] {
            let balancer = build_balancer(strategy, 150, &backends);
            assert_eq!(balancer.name(), name);
            assert!(balancer.pick("k").is_some());
        }
    }
}
