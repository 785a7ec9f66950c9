//! Package catalog mirror: version discovery for upstream catalogs and a
//! governed HTTP gateway for the mirrored artifacts.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod persist;
pub mod server;
pub mod status;
pub mod sync;
pub mod version;
