pub mod api;
pub mod config;
pub mod db;
pub mod indexer;
pub mod ledger;
pub mod pipeline;
pub mod scheduler;
