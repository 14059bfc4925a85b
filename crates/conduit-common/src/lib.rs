//! Common types for the conduit operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod leader_election;
pub mod telemetry;

pub use error::{Error, ReconcileError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the Conduit and Trench CRDs
pub const API_GROUP: &str = "meridio.nordix.org";

/// Default annotation a Conduit uses to declare its update sync group
pub const DEFAULT_SYNC_GROUP_ANNOTATION: &str = "meridio.nordix.org/update-sync-group";

/// Annotation selecting a named resource template for the proxy containers
///
/// Mirrored onto the proxy DaemonSet so the selected template is visible there.
pub const RESOURCE_TEMPLATE_ANNOTATION: &str = "resource-template";

/// Label on a Conduit naming the Trench it belongs to
pub const TRENCH_LABEL: &str = "trench";

/// Field manager used for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "conduit-operator";

/// Namespace holding the leader lease when none is configured
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "meridio";
