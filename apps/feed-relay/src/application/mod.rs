//! Application Layer - Port definitions.
//!
//! This layer defines the contracts between the session logic and the
//! external systems it drives (the upstream broker, the snapshot store).

/// Port interfaces for external systems (broker gateway, snapshot store).
pub mod ports;
