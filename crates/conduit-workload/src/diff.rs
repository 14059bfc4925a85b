//! Desired vs observed workload comparison

use conduit_common::{Result, RESOURCE_TEMPLATE_ANNOTATION};
use serde_json::Value;

use crate::workload::WorkloadSpec;

/// Whether applying `desired` would change the observed workload
///
/// Only fields set in the desired spec are compared. Fields the API server
/// fills in with defaults are ignored, so a freshly applied workload does
/// not keep reporting a difference.
///
/// Dropping the resource template leaves nothing set in the desired spec, so
/// the mirrored template annotation is compared as well.
pub fn needs_update(desired: &WorkloadSpec, observed: &WorkloadSpec) -> Result<bool> {
    if desired.kind() != observed.kind() {
        return Ok(true);
    }
    if desired.annotation(RESOURCE_TEMPLATE_ANNOTATION)
        != observed.annotation(RESOURCE_TEMPLATE_ANNOTATION)
    {
        return Ok(true);
    }
    Ok(!is_subset(&desired.spec_json()?, &observed.spec_json()?))
}

/// True iff every value set in `desired` is present and equal in `observed`
///
/// Objects compare key by key, arrays element by element (same length), and
/// scalars by equality. A `null` in `desired` matches anything.
pub fn is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Null, _) => true,
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| match have.get(key) {
            Some(observed) => is_subset(value, observed),
            None => value.is_null(),
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        (want, have) => want == have,
    }
}
