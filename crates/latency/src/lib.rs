//! Last-known latency of each proxy, and the background prober that keeps it fresh.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod prober;

pub use cache::{Delay, LatencyCache, LatencySample};
pub use prober::{LatencyProber, LatencyProberConfig};
