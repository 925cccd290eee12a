//! Project scoping rules for networks.
//!
//! Projects without the networks feature share the default project's
//! networks; restricted projects can limit which networks are
//! reachable and how many can be created.

use std::collections::HashMap;

use netgrid_catalog::Catalog;
use netgrid_core::DEFAULT_PROJECT;

use crate::response::{ApiError, ApiResult};

/// Resolve the project that owns networks for a request.
///
/// Returns the effective project name and the *requested* project's
/// config (policy checks always evaluate against the caller's own
/// project).
pub fn network_project(
    catalog: &Catalog,
    requested: Option<&str>,
) -> ApiResult<(String, HashMap<String, String>)> {
    let requested = requested.unwrap_or(DEFAULT_PROJECT);

    let config = catalog
        .get_project(requested)?
        .map(|p| p.config)
        .unwrap_or_default();

    if requested == DEFAULT_PROJECT {
        return Ok((DEFAULT_PROJECT.to_string(), config));
    }

    let effective = if config.get("features.networks").map(String::as_str) == Some("true") {
        requested.to_string()
    } else {
        DEFAULT_PROJECT.to_string()
    };

    Ok((effective, config))
}

/// Whether a project's policy allows access to a network name.
/// Unmanaged host interfaces are never restricted (they are only
/// visible through the default project anyway).
pub fn network_allowed(
    project_config: &HashMap<String, String>,
    network: &str,
    managed: bool,
) -> bool {
    if !managed {
        return true;
    }

    if project_config.get("restricted").map(String::as_str) != Some("true") {
        return true;
    }

    match project_config.get("restricted.networks.access") {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => list.split(',').any(|n| n.trim() == network),
    }
}

/// Enforce the `limits.networks` quota for a create in a non-default
/// project. The check is skipped when the name already exists: that
/// request continues a pending define or fails as a duplicate anyway.
pub fn check_network_limit(
    catalog: &Catalog,
    project: &str,
    project_config: &HashMap<String, String>,
    name: &str,
) -> ApiResult<()> {
    let Some(limit) = project_config.get("limits.networks") else {
        return Ok(());
    };

    let limit: usize = limit.parse().map_err(|_| {
        ApiError::Internal(format!("invalid project limits.networks value {limit:?}"))
    })?;

    let networks = catalog.list_networks(project)?;
    if !networks.iter().any(|n| n == name) && networks.len() >= limit {
        return Err(ApiError::BadRequest(
            "Networks limit has been reached for project".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgrid_catalog::ProjectRecord;

    fn catalog_with_project(name: &str, config: &[(&str, &str)]) -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .put_project(&ProjectRecord {
                name: name.to_string(),
                config: config
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .unwrap();
        catalog
    }

    #[test]
    fn default_project_resolves_to_itself() {
        let catalog = Catalog::open_in_memory().unwrap();
        let (effective, _) = network_project(&catalog, None).unwrap();
        assert_eq!(effective, "default");
    }

    #[test]
    fn project_without_networks_feature_remaps_to_default() {
        let catalog = catalog_with_project("tenant1", &[]);
        let (effective, _) = network_project(&catalog, Some("tenant1")).unwrap();
        assert_eq!(effective, "default");
    }

    #[test]
    fn project_with_networks_feature_owns_its_networks() {
        let catalog = catalog_with_project("tenant1", &[("features.networks", "true")]);
        let (effective, config) = network_project(&catalog, Some("tenant1")).unwrap();
        assert_eq!(effective, "tenant1");
        assert!(config.contains_key("features.networks"));
    }

    #[test]
    fn unrestricted_project_allows_all() {
        assert!(network_allowed(&HashMap::new(), "br0", true));
    }

    #[test]
    fn restricted_access_list_filters_managed_networks() {
        let config = HashMap::from([
            ("restricted".to_string(), "true".to_string()),
            ("restricted.networks.access".to_string(), "br0, ovn0".to_string()),
        ]);

        assert!(network_allowed(&config, "br0", true));
        assert!(network_allowed(&config, "ovn0", true));
        assert!(!network_allowed(&config, "br1", true));
        // Unmanaged host interfaces stay visible.
        assert!(network_allowed(&config, "eth0", false));
    }

    #[test]
    fn quota_counts_existing_networks() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .create_network("a", "tenant1", "ovn0", "", "ovn", &HashMap::new())
            .unwrap();

        let config = HashMap::from([("limits.networks".to_string(), "1".to_string())]);

        let err = check_network_limit(&catalog, "tenant1", &config, "ovn1").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        // Re-running create for an existing name skips the quota.
        check_network_limit(&catalog, "tenant1", &config, "ovn0").unwrap();
    }
}
