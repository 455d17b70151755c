//! Mirrors OMERO projects, datasets and images into the per-user directory
//! layout expected by the HRM deconvolution server.

pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod remote;
pub mod report;
pub mod store;
pub mod walker;
