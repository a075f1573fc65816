//! Domain layer
//!
//! Port traits, device inventory records and quantity helpers shared by the
//! planners and the reconcilers.

pub mod devices;
pub mod ports;
pub mod quantity;

pub use devices::{DeviceRef, DeviceSelection, LocalDisk, Partition};
pub use ports::{
    ApplyOutcome, ClusterApi, ClusterApiRef, DeviceDiscovery, DeviceDiscoveryRef,
};
pub use quantity::{parse_quantity, quantity_value};
