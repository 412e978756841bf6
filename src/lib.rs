// Library exports for the binary and integration tests

pub mod batch;
pub mod cancellation;
pub mod config;
pub mod date_resolver;
pub mod decision;
pub mod error;
pub mod exif;
pub mod external_tool;
pub mod file_writer;
pub mod ledger;
pub mod path_generator;
pub mod photo_filter;
pub mod pipeline;
pub mod processor;
pub mod source_reader;
