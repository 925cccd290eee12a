//! Entity tags over the canonical network view.
//!
//! The tag covers `(name, managed, type, description, config)` with the
//! config sorted, so two reads returning identical fields always agree.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use crate::response::{ApiError, ApiResult};

/// Compute the entity tag for a network view.
pub fn network_etag(
    name: &str,
    managed: bool,
    network_type: &str,
    description: &str,
    config: &HashMap<String, String>,
) -> String {
    let canonical: BTreeMap<&str, &str> = config
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    managed.hash(&mut hasher);
    network_type.hash(&mut hasher);
    description.hash(&mut hasher);
    canonical.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Enforce an `If-Match` precondition against the current tag.
pub fn check_etag(if_match: Option<&str>, current: &str) -> ApiResult<()> {
    match if_match {
        None => Ok(()),
        Some(wanted) if wanted.trim_matches('"') == current => Ok(()),
        Some(wanted) => Err(ApiError::PreconditionFailed(format!(
            "ETag doesn't match: {wanted} vs {current}"
        ))),
    }
}
