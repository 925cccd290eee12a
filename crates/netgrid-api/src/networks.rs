//! Collection handlers: listing and the network creation protocol.
//!
//! Creation takes one of four mutually exclusive paths:
//!
//! 1. a peer-originated notification actuates a previously defined
//!    record on this member;
//! 2. `?target=<member>` defines a pending per-member row without
//!    actuating anything;
//! 3. the cluster commit inserts the global config, actuates locally,
//!    fans out to peers and marks the record created;
//! 4. the single-member path inserts and actuates in one step.
//!
//! Re-invoking create on an `errored` record (with empty config)
//! re-runs the commit to recover from partial failure. Changing global
//! config after a failed create requires delete and recreate.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use netgrid_catalog::{is_node_specific, strip_node_specific, NetworkRecord};
use netgrid_cluster::NotifyScope;
use netgrid_core::{
    ClientType, FilterClauses, Network as ApiNetwork, NetworkStatus, NetworksPost, API_VERSION,
    DEFAULT_PROJECT,
};
use netgrid_driver::{load_by_name, load_by_type, Network};

use crate::events::{LifecycleEvent, NETWORK_CREATED};
use crate::network::do_network_get;
use crate::project::{check_network_limit, network_allowed, network_project};
use crate::response::{ApiError, ApiResult, SyncResponse};
use crate::Controller;

/// Whether a request is a peer-originated cluster notification.
pub(crate) fn is_cluster_notification(client_type: ClientType) -> bool {
    client_type == ClientType::Notifier
}

pub(crate) fn client_type_from(headers: &HeaderMap) -> ClientType {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    ClientType::from_user_agent(user_agent)
}

pub(crate) fn requestor_from(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

fn query_flag(params: &HashMap<String, String>, key: &str) -> bool {
    matches!(
        params.get(key).map(String::as_str),
        Some("1") | Some("true")
    )
}

// ── List ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum NetworkList {
    Urls(Vec<String>),
    Records(Vec<ApiNetwork>),
}

/// `GET /1.0/networks`
pub async fn list_networks(
    State(ctrl): State<Controller>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let result = list_networks_inner(
        &ctrl,
        params.get("project").map(String::as_str),
        query_flag(&params, "all-projects"),
        query_flag(&params, "recursion"),
        params.get("filter").map(String::as_str),
    )
    .await;

    match result {
        Ok(NetworkList::Urls(urls)) => SyncResponse::new(urls).into_response(),
        Ok(NetworkList::Records(records)) => SyncResponse::new(records).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn list_networks_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    all_projects: bool,
    recursion: bool,
    filter: Option<&str>,
) -> ApiResult<NetworkList> {
    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    let clauses = FilterClauses::parse(filter.unwrap_or(""))
        .map_err(|e| ApiError::BadRequest(format!("Invalid filter: {e}")))?;
    let must_load = recursion || !clauses.is_empty();

    let mut network_names: Vec<(String, Vec<String>)> = if all_projects {
        ctrl.catalog.list_all_projects_networks()?.into_iter().collect()
    } else {
        vec![(project.clone(), ctrl.catalog.list_networks(&project)?)]
    };
    network_names.sort_by(|a, b| a.0.cmp(&b.0));

    // Host interfaces are enumerated alongside managed networks in the
    // default project, skipping veth pairs.
    if project == DEFAULT_PROJECT {
        let mut host = ctrl
            .datapath
            .host_interfaces()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        host.retain(|name| !name.starts_with("veth"));

        match network_names.iter_mut().find(|(p, _)| p == DEFAULT_PROJECT) {
            Some((_, names)) => {
                for iface in host {
                    if !names.contains(&iface) {
                        names.push(iface);
                    }
                }
            }
            None => network_names.push((DEFAULT_PROJECT.to_string(), host)),
        }
    }

    let clustered = ctrl.clustered()?;
    let mut urls = Vec::new();
    let mut records = Vec::new();

    for (project_name, names) in network_names {
        for name in names {
            if !ctrl.authorizer.can_view(&project_name, &name) {
                continue;
            }

            if must_load {
                let net = match do_network_get(ctrl, clustered, &project_name, &req_config, &name)
                    .await
                {
                    Ok(net) => net,
                    Err(_) => continue,
                };

                if !clauses.is_empty()
                    && !clauses
                        .matches(&net)
                        .map_err(|e| ApiError::BadRequest(format!("Invalid filter: {e}")))?
                {
                    continue;
                }

                records.push(net);
            } else if !network_allowed(&req_config, &name, true) {
                continue;
            }

            urls.push(format!("/{API_VERSION}/networks/{name}"));
        }
    }

    if recursion {
        Ok(NetworkList::Records(records))
    } else {
        Ok(NetworkList::Urls(urls))
    }
}

// ── Create ────────────────────────────────────────────────────────

/// `POST /1.0/networks`
pub async fn create_network(
    State(ctrl): State<Controller>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(req): Json<NetworksPost>,
) -> Response {
    let client_type = client_type_from(&headers);
    let requestor = requestor_from(&headers);

    let result = create_network_inner(
        &ctrl,
        params.get("project").map(String::as_str),
        params.get("target").map(String::as_str),
        client_type,
        &requestor,
        req,
    )
    .await;

    match result {
        Ok(location) => (
            StatusCode::OK,
            [(header::LOCATION, location)],
            SyncResponse::new(()),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn create_network_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    target: Option<&str>,
    client_type: ClientType,
    requestor: &str,
    mut req: NetworksPost,
) -> ApiResult<String> {
    let lock = ctrl.create_lock();
    let _guard = lock.lock().await;

    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    if req.name.is_empty() {
        return Err(ApiError::BadRequest("No name provided".to_string()));
    }
    if req.name == "none" {
        return Err(ApiError::BadRequest(
            "Network name 'none' is not valid".to_string(),
        ));
    }
    if !network_allowed(&req_config, &req.name, true) {
        return Err(ApiError::Forbidden(
            "Network not allowed in project".to_string(),
        ));
    }

    if req.network_type.is_empty() {
        // Only overlay networks can live inside network-enabled projects.
        req.network_type = if project != DEFAULT_PROJECT {
            "ovn".to_string()
        } else {
            "bridge".to_string()
        };
    }

    let type_driver = load_by_type(ctrl.driver_ctx(), &req.network_type)?;
    type_driver.validate_name(&req.name)?;

    let info = type_driver.info();
    if project != DEFAULT_PROJECT && !info.projects {
        return Err(ApiError::BadRequest(
            "Network type does not support non-default projects".to_string(),
        ));
    }
    if project != DEFAULT_PROJECT {
        check_network_limit(&ctrl.catalog, &project, &req_config, &req.name)?;
    }

    let location = format!("/{API_VERSION}/networks/{}", req.name);

    // Path 1: a peer already defined the record; actuate it here.
    if is_cluster_notification(client_type) {
        let driver = load_by_name(ctrl.driver_ctx(), &project, &req.name)?;
        do_networks_create(ctrl, driver.as_ref(), client_type).await?;
        return Ok(location);
    }

    // Path 2: define a pending row for one member, no actuation.
    if let Some(target) = target {
        if !info.node_specific_config {
            return Err(ApiError::BadRequest(format!(
                "Network type {:?} does not support member specific config",
                req.network_type
            )));
        }
        for key in req.config.keys() {
            if !is_node_specific(key) {
                return Err(ApiError::BadRequest(format!(
                    "Config key {key:?} may not be used as member-specific key"
                )));
            }
        }

        let exists = ctrl.catalog.get_record(&project, &req.name)?.is_some();

        ctrl.catalog
            .create_pending_network(
                target,
                &project,
                &req.name,
                &req.description,
                &req.network_type,
                &req.config,
            )
            .map_err(|e| {
                if e.is_already_defined() {
                    ApiError::Conflict(format!(
                        "Network {:?} is already defined on member {target:?}",
                        req.name
                    ))
                } else {
                    e.into()
                }
            })?;

        if !exists {
            register_network(ctrl, &project, &req.name, requestor);
        }
        return Ok(location);
    }

    let existing = ctrl.catalog.get_record(&project, &req.name)?;
    let member_count = ctrl.catalog.member_count()?;

    // Path 3: clustered commit, also taken to recover a partially
    // created record.
    let recovering = existing
        .as_ref()
        .map(|r| r.status != NetworkStatus::Created)
        .unwrap_or(false);
    if member_count > 1 || recovering {
        // Types without member-specific config skip the per-member
        // define steps; simulate them here.
        if !info.node_specific_config && client_type != ClientType::Joiner {
            for member in ctrl.catalog.list_members()? {
                match ctrl.catalog.create_pending_network(
                    &member.name,
                    &project,
                    &req.name,
                    &req.description,
                    &req.network_type,
                    &HashMap::new(),
                ) {
                    Ok(_) => {}
                    Err(e) if e.is_already_defined() => {}
                    Err(e) => {
                        return Err(ApiError::Internal(format!(
                            "Failed creating pending network for member {:?}: {e}",
                            member.name
                        )))
                    }
                }
            }
            register_network(ctrl, &project, &req.name, requestor);
        }

        networks_post_cluster(ctrl, &project, existing, req, client_type).await?;
        return Ok(location);
    }

    // Path 4: single-member creation.
    if existing.is_some() {
        return Err(ApiError::Conflict(format!(
            "Network {:?} already exists",
            req.name
        )));
    }

    if client_type != ClientType::Joiner {
        type_driver.fill_config(&mut req.config)?;
    }

    ctrl.catalog.create_network(
        ctrl.local_member(),
        &project,
        &req.name,
        &req.description,
        &req.network_type,
        &req.config,
    )?;

    let actuated: ApiResult<()> = async {
        let driver = load_by_name(ctrl.driver_ctx(), &project, &req.name)?;
        do_networks_create(ctrl, driver.as_ref(), client_type).await
    }
    .await;
    if let Err(e) = actuated {
        // Revert the catalog row so a failed create leaves no trace.
        let _ = ctrl.catalog.delete_network(&project, &req.name);
        return Err(e);
    }

    register_network(ctrl, &project, &req.name, requestor);
    Ok(location)
}

/// Mirror a new network into the authorizer and announce it. Neither
/// step may fail the request.
fn register_network(ctrl: &Controller, project: &str, name: &str, requestor: &str) {
    if let Err(e) = ctrl.authorizer.add_network(project, name) {
        error!(%name, %project, error = %e, "failed to add network to authorizer");
    }
    ctrl.events.send_lifecycle(LifecycleEvent::network(
        NETWORK_CREATED,
        project,
        name,
        requestor,
    ));
}

// ── Two-phase commit ──────────────────────────────────────────────

/// Whether a record has had a previous create attempt fail after the
/// global config insert.
fn network_partially_created(ctrl: &Controller, record: &NetworkRecord) -> ApiResult<bool> {
    if record.status == NetworkStatus::Errored {
        return Ok(true);
    }
    Ok(!ctrl.catalog.network_config(record.id, "")?.is_empty())
}

/// Commit a defined network cluster-wide: insert the global config,
/// actuate locally, fan out to every peer, then mark the record
/// created. Any failure after the config insert leaves the record
/// `errored`; re-running create with empty config retries.
async fn networks_post_cluster(
    ctrl: &Controller,
    project: &str,
    existing: Option<NetworkRecord>,
    mut req: NetworksPost,
    client_type: ClientType,
) -> ApiResult<()> {
    for key in req.config.keys() {
        if is_node_specific(key) {
            return Err(ApiError::BadRequest(format!(
                "Config key {key:?} is cluster member specific"
            )));
        }
    }

    if let Some(record) = &existing {
        if record.status == NetworkStatus::Created {
            return Err(ApiError::BadRequest(
                "The network is already created".to_string(),
            ));
        }
        if req.network_type != record.network_type {
            return Err(ApiError::BadRequest(format!(
                "Requested network type {:?} doesn't match type in existing database record {:?}",
                req.network_type, record.network_type
            )));
        }
    }

    let partially_created = match &existing {
        Some(record) => network_partially_created(ctrl, record)?,
        None => false,
    };

    let mut node_configs = HashMap::new();
    if partially_created {
        if !req.config.is_empty() {
            return Err(ApiError::BadRequest(
                "Network already partially created. Please do not specify any global config when re-running create"
                    .to_string(),
            ));
        }
        debug!(%project, network = %req.name, "skipping global config insert on re-run");
    } else {
        let type_driver = load_by_type(ctrl.driver_ctx(), &req.network_type)?;
        type_driver.fill_config(&mut req.config)?;

        node_configs = ctrl
            .catalog
            .commit_global_config(project, &req.name, &req.config)
            .map_err(|e| {
                if e.is_not_found() {
                    ApiError::BadRequest(
                        "Network not pending on any member (use ?target=<member> first)"
                            .to_string(),
                    )
                } else {
                    e.into()
                }
            })?;
    }

    let notifier = ctrl.cluster.notifier(&ctrl.catalog, NotifyScope::All)?;

    let driver = load_by_name(ctrl.driver_ctx(), project, &req.name)?;
    let local_config = driver.config().clone();

    do_networks_create(ctrl, driver.as_ref(), client_type).await?;
    debug!(%project, network = %req.name, "created network on local cluster member");

    // Peers get the global view plus their own node-specific fragment,
    // never this member's.
    let stripped = Arc::new(strip_node_specific(&local_config));
    let node_configs = Arc::new(node_configs);
    let name = driver.name().to_string();
    let network_type = driver.network_type().to_string();
    let description = driver.description().to_string();
    let net_project = driver.project().to_string();

    notifier
        .notify(move |member, client| {
            let stripped = stripped.clone();
            let node_configs = node_configs.clone();
            let name = name.clone();
            let network_type = network_type.clone();
            let description = description.clone();
            let net_project = net_project.clone();
            Box::pin(async move {
                let mut config = (*stripped).clone();
                if let Some(fragment) = node_configs.get(&member.name) {
                    config.extend(fragment.clone());
                }

                let node_req = NetworksPost {
                    name: name.clone(),
                    network_type,
                    description,
                    config,
                };
                client.create_network(&net_project, &node_req).await?;
                debug!(member = %member.name, network = %name, "created network on cluster member");
                Ok(())
            })
        })
        .await?;

    ctrl.catalog.network_created(project, &req.name)?;
    debug!(%project, network = %req.name, "marked network global status as created");

    Ok(())
}

// ── Local actuation ───────────────────────────────────────────────

/// Actuate a defined network on this member: validate the effective
/// config, create and start the driver resource, then mark the local
/// status created. A failed start tears the resource back down.
pub(crate) async fn do_networks_create(
    ctrl: &Controller,
    driver: &dyn Network,
    client_type: ClientType,
) -> ApiResult<()> {
    let mut validate_config = driver.config().clone();

    // ACL objects may not be replicated yet while joining.
    if client_type == ClientType::Joiner {
        validate_config
            .retain(|k, _| k != "security.acls" && !k.starts_with("security.acls."));
    }

    driver.validate(&validate_config)?;

    if driver.local_status() == NetworkStatus::Created {
        debug!(
            project = %driver.project(),
            network = %driver.name(),
            "skipping local network create as already created"
        );
        return Ok(());
    }

    driver.create(client_type).await?;

    // Joiners don't start: the network comes up once the member has a
    // consistent view of the cluster config.
    let outcome: ApiResult<()> = async {
        if client_type != ClientType::Joiner {
            driver.start().await?;
        }
        ctrl.catalog
            .network_node_created(driver.id(), ctrl.local_member())?;
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        let _ = driver.delete(client_type).await;
        return Err(e);
    }

    debug!(
        project = %driver.project(),
        network = %driver.name(),
        "marked network local status as created"
    );
    Ok(())
}
