#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod config;
pub mod engine;
pub mod html;
pub mod identity;
pub mod queue;

pub use config::FilepoolConfig;
pub use engine::{Filepool, ResolvedUrl};
pub use html::{extract_downloadable_files_from_html, extract_downloadable_urls_from_html};
pub use identity::{
    file_id_for_url, guess_extension_from_url, is_downloadable_url, package_dir_name_for_url,
    remove_revision_from_url, revision_from_file_list, revision_from_url,
    timemodified_from_file_list,
};
pub use queue::QueueTicket;

// Silence unused dev-dependency warnings; integration tests use these.
#[cfg(test)]
use async_trait as _;
#[cfg(test)]
use filepool_db as _;
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tokio_test as _;
