//! Node and wallet front ends over the Kaidos ledger engine.

pub mod network;
