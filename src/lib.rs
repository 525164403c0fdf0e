//! mldata library
//!
//! Downloads machine learning datasets, caches them under a base directory
//! and decodes them into arrays. MNIST is provided out of the box; its IDX
//! decoder and the cache work for any IDX-format dataset.

pub mod cache;
pub mod config;
pub mod dataset;
pub mod mnist;
pub mod utils;
