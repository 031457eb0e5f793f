//! On-demand HTTP(S) probe exporter: every scrape of `/metrics` performs one
//! instrumented fetch of the requested target and reports its phase timings.

pub mod collector;
pub mod config;
pub mod metrics;
pub mod notify;
pub mod prober;
pub mod timestamp;
pub mod trace;
pub mod util;

#[cfg(test)]
mod test_support;
