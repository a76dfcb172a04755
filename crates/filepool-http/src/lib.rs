#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

mod fetcher;

pub use fetcher::ReqwestFileFetcher;

// Silence unused dev-dependency warnings
#[cfg(test)]
use tokio_test as _;
