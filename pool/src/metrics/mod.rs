pub mod counters;

pub use counters::PoolCounters;
