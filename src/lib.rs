pub mod compose;
pub mod config;
pub mod credentials;
pub mod db;
pub mod output;
pub mod provider;
pub mod reconcile;
pub mod sync;
pub mod trigger;
