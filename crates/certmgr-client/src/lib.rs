//! HTTP client for the certificate manager REST API.
//!
//! This crate provides the main [`CertManagerClient`] and its endpoint groups:
//!
//! - [`api::DcvApi`] for domain control validation
//! - [`api::SmimeApi`] for the client certificate lifecycle

#![doc(html_root_url = "https://docs.rs/certmgr-client/0.3.0")]

mod client;
mod config;
pub mod api;

pub use client::{CertManagerClient, CertManagerClientBuilder, DEFAULT_PAGE_SIZE};
pub use config::*;
pub use certmgr_core::{CertManagerError, Result};
