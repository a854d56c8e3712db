//! Load-balancing strategies for upstream selection.

pub mod balancer;

pub use balancer::{
    build_balancer, Balancer, ConsistentHash, LeastConnections, RoundRobin, WeightedBackend,
    WeightedRoundRobin,
};
