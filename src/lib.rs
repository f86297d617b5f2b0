pub mod backend;
pub mod batch;
pub mod carrier;
pub mod catalog;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod constants;
pub mod device;
pub mod logging;
pub mod manifest;
pub mod metadata;
pub mod parser;
pub mod pipeline;
