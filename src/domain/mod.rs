//! Domain model: payouts, batches, money and the ports the engine consumes.

pub mod batch;
pub mod gateway;
pub mod money;
pub mod payout;
pub mod ports;
