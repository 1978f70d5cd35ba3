//! Core types and validation rules for the certificate manager client.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - **Types**: Strongly-typed representations of DCV and S/MIME API payloads
//! - **Rules**: Local input checks that run before anything touches the network
//! - **Errors**: The shared [`CertManagerError`] taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use certmgr_core::{ValidationFilter, ValidationMethod, Result};
//!
//! fn filter_for(domain: &str) -> Result<(ValidationFilter, ValidationMethod)> {
//!     let method: ValidationMethod = "cname".parse()?;
//!     Ok((ValidationFilter::new().domain(domain), method))
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/certmgr-core/0.3.0")]

mod error;
pub mod types;

pub use error::{CertManagerError, Result};
pub use types::*;
