//! Human-readable order number generation.

use chrono::Utc;
use rand::Rng;

/// Generates an order number of the form `ORD-<timestamp>-<random>`.
///
/// The timestamp is the current UTC time to second precision (14 digits),
/// the suffix a zero-padded random number, e.g. `ORD-20250314091530-0427`.
pub fn next_order_number() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: u32 = rand::rng().random_range(0..10_000);
    format!("ORD-{timestamp}-{suffix:04}")
}
