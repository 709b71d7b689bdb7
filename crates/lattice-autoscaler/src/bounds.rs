//! Scaling bounds annotations
//!
//! A MachineSet or MachineDeployment opts into autoscaling by carrying both
//! the min-size and max-size annotations. Missing annotations mean "not a
//! node group". Bad values are an operator mistake and surface as
//! [`Error::Validation`](lattice_common::Error::Validation).

use std::collections::BTreeMap;

use serde::Serialize;

use lattice_common::{Error, Result};

use crate::constants::{NODE_GROUP_MAX_SIZE_ANNOTATION, NODE_GROUP_MIN_SIZE_ANNOTATION};

/// Validated `[min, max]` replica bounds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ScalingBounds {
    /// Minimum replicas, never negative
    pub min: i32,
    /// Maximum replicas, never below `min`
    pub max: i32,
}

impl ScalingBounds {
    /// Whether the group can change size at all
    pub fn has_room(&self) -> bool {
        self.max > self.min
    }

    /// Whether `replicas` lies within the bounds
    pub fn contains(&self, replicas: i32) -> bool {
        (self.min..=self.max).contains(&replicas)
    }
}

/// Plain base-10 integer: optional leading `-`, no sign `+`, no whitespace
fn parse_size(resource: &str, field: &str, value: &str) -> Result<i32> {
    let invalid = |reason: String| {
        Error::validation_for_field(
            resource,
            field,
            format!("invalid value {:?}: {}", value, reason),
        )
    };
    if value.starts_with('+') {
        return Err(invalid("unexpected sign".to_string()));
    }
    value.parse::<i32>().map_err(|e| invalid(e.to_string()))
}

/// Parse the bounds annotations of `resource`.
///
/// `Ok(None)` when either annotation is absent. Degenerate bounds
/// (`min == max`) parse successfully; callers decide what to do with them
/// via [`ScalingBounds::has_room`].
pub fn parse_bounds(
    resource: &str,
    annotations: &BTreeMap<String, String>,
) -> Result<Option<ScalingBounds>> {
    let (Some(min), Some(max)) = (
        annotations.get(NODE_GROUP_MIN_SIZE_ANNOTATION),
        annotations.get(NODE_GROUP_MAX_SIZE_ANNOTATION),
    ) else {
        return Ok(None);
    };

    let min = parse_size(resource, NODE_GROUP_MIN_SIZE_ANNOTATION, min)?;
    let max = parse_size(resource, NODE_GROUP_MAX_SIZE_ANNOTATION, max)?;

    if min < 0 {
        return Err(Error::validation_for_field(
            resource,
            NODE_GROUP_MIN_SIZE_ANNOTATION,
            format!("minimum size must be >= 0, got {}", min),
        ));
    }
    if max < min {
        return Err(Error::validation_for_field(
            resource,
            NODE_GROUP_MAX_SIZE_ANNOTATION,
            format!("maximum size {} is below minimum size {}", max, min),
        ));
    }

    Ok(Some(ScalingBounds { min, max }))
}
