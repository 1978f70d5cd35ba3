//! Endpoint groups of the certificate manager API.

mod dcv;
mod smime;

pub use dcv::DcvApi;
pub use smime::{CollectRequestBuilder, SmimeApi};
