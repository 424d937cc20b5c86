#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod datamodel;
pub mod exporters;
pub mod overview;
pub mod series;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
