//! Tutorial bounty payer.
//!
//! Users submit finished tutorials to a submission registry contract. A
//! reviewer marks each PENDING submission VALID or INVALID, and the payer
//! pays every approved submission once out of a pooled payout contract,
//! recording each attempt in SQLite.

pub mod api;
pub mod config;
pub mod db;
pub mod demo;
pub mod errors;
pub mod ledger;
pub mod payer;
pub mod policy;
pub mod registry;
pub mod review;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod test_payer;
