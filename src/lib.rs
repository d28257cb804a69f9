pub mod bot;
pub mod checkpoint_tracker;
pub mod config;
pub mod constants;
pub mod ledger;
pub mod logging;
pub mod race_state;
pub mod respawn;
pub mod rng;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod track;
pub mod types;
pub mod vehicle;
