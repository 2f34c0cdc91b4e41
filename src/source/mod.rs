//! The source manager subsystem.

pub mod deduce;
pub mod gateway;
pub mod manager;
pub mod scan;

pub use gateway::{Gateway, GatewayError, GatewayState};
pub use manager::{HttpFetcher, SourceError, SourceManager};
pub use scan::{PackageScanner, WalkingPackageScanner};
