//! metron collector server: accepts metric updates over HTTP and serves
//! the current values back from a [`metron_storage::MetricStore`].

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod state;
