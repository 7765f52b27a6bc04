#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod analytics;
pub mod browser_controller;
pub mod config;
pub mod detail;
pub mod gcp;
pub mod listing;
pub mod normalizer;
pub mod runner;
pub mod sink;
pub mod types;
pub mod uploader;
pub mod utils;
