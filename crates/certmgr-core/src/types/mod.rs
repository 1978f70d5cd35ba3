mod common;
mod dcv;
mod smime;

pub use common::*;
pub use dcv::*;
pub use smime::*;
