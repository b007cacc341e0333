pub mod array;
pub mod array_store;
pub mod catalog;
pub mod cds;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod explore;
pub mod extract;
pub mod fetch;
#[cfg(feature = "netcdf")]
pub mod nc_reader;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod store;
pub mod time;
