// src/load_balancer/mod.rs
mod algorithm;
mod least_connections;

pub use algorithm::LoadBalancer; // trait
pub use least_connections::LeastConnectionsBalancer;
