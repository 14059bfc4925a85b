//! Custom Resource Definitions watched by the conduit operator

mod conduit;
mod trench;

pub use conduit::{Conduit, ConduitSpec, ConduitType, PortNat, TransportProtocol};
pub use trench::{IpFamily, Trench, TrenchSpec};
