//! Item handlers: get, update, patch, rename, delete, leases, state.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use netgrid_catalog::strip_node_specific;
use netgrid_cluster::NotifyScope;
use netgrid_core::{
    ClientType, Network as ApiNetwork, NetworkPost, NetworkPut, NetworkStatus, API_VERSION,
    DEFAULT_PROJECT,
};
use netgrid_driver::{load_by_name, DriverError, InterfaceKind};

use crate::etag::{check_etag, network_etag};
use crate::events::{
    LifecycleEvent, NETWORK_DELETED, NETWORK_RENAMED, NETWORK_UPDATED,
};
use crate::networks::{client_type_from, is_cluster_notification, requestor_from};
use crate::project::{network_allowed, network_project};
use crate::response::{ApiError, ApiResult, SyncResponse};
use crate::Controller;

/// Forward the request to the member named by `?target=` when that
/// isn't us. Returns the peer's response verbatim.
async fn forward_if_remote(
    ctrl: &Controller,
    params: &HashMap<String, String>,
    method: &str,
    path: String,
    body: Option<serde_json::Value>,
) -> ApiResult<Option<Response>> {
    let Some(target) = params.get("target") else {
        return Ok(None);
    };
    if target == ctrl.local_member() {
        return Ok(None);
    }

    let member = ctrl
        .catalog
        .list_members()?
        .into_iter()
        .find(|m| &m.name == target)
        .ok_or_else(|| ApiError::BadRequest(format!("No cluster member called {target:?}")))?;

    let query: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| k.as_str() != "target")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let client = ctrl.cluster.client_for(&member);
    let (status, body) = client.forward(method, &path, &query, body).await?;

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok(Some((status, Json(body)).into_response()))
}

// ── Get ───────────────────────────────────────────────────────────

/// `GET /1.0/networks/{name}`
pub async fn get_network(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match forward_if_remote(&ctrl, &params, "GET", format!("/networks/{name}"), None).await {
        Ok(Some(response)) => return response,
        Ok(None) => {}
        Err(e) => return e.into_response(),
    }

    let result = get_network_inner(
        &ctrl,
        params.get("project").map(String::as_str),
        params.get("target").map(String::as_str),
        &name,
    )
    .await;

    match result {
        Ok((net, etag)) => {
            (StatusCode::OK, [(header::ETAG, etag)], SyncResponse::new(net)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn get_network_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    target: Option<&str>,
    name: &str,
) -> ApiResult<(ApiNetwork, String)> {
    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    let all_nodes = ctrl.clustered()? && target.is_none();
    let net = do_network_get(ctrl, all_nodes, &project, &req_config, name).await?;

    let etag = network_etag(
        &net.name,
        net.managed,
        &net.network_type,
        &net.description,
        &net.config,
    );
    Ok((net, etag))
}

/// Materialise the API view of one network. With `all_nodes` the
/// member-specific config keys are stripped and the global status is
/// reported; otherwise the local view is returned. Unmanaged host
/// interfaces are typed by probing the datapath.
pub(crate) async fn do_network_get(
    ctrl: &Controller,
    all_nodes: bool,
    project: &str,
    req_config: &HashMap<String, String>,
    name: &str,
) -> ApiResult<ApiNetwork> {
    // veth pairs are instance-side devices, never networks.
    if name.starts_with("veth") {
        return Err(ApiError::network_not_found());
    }

    let driver = match load_by_name(ctrl.driver_ctx(), project, name) {
        Ok(driver) => Some(driver),
        Err(DriverError::NotFound) => None,
        Err(e) => return Err(e.into()),
    };

    // Host interfaces are only reachable through the default project.
    if project != DEFAULT_PROJECT && driver.is_none() {
        return Err(ApiError::network_not_found());
    }

    if !network_allowed(req_config, name, driver.is_some()) {
        return Err(ApiError::network_not_found());
    }

    let os_exists = ctrl.datapath.interface_exists(name);
    if driver.is_none() && !os_exists {
        return Err(ApiError::network_not_found());
    }

    let mut net = ApiNetwork {
        name: name.to_string(),
        project: project.to_string(),
        ..Default::default()
    };

    match &driver {
        Some(driver) => {
            net.managed = true;
            net.description = driver.description().to_string();
            net.network_type = driver.network_type().to_string();

            // Config can carry sensitive values; only editors see it.
            if ctrl.authorizer.can_edit(project, name) {
                net.config = driver.config().clone();
            }
            if all_nodes {
                net.config = strip_node_specific(&net.config);
            }
        }
        None => {
            net.network_type = match ctrl.datapath.interface_kind(name) {
                Some(InterfaceKind::Loopback) => "loopback",
                Some(InterfaceKind::Bridge) => "bridge",
                Some(InterfaceKind::Vlan) => "vlan",
                Some(InterfaceKind::Physical) => "physical",
                Some(InterfaceKind::Bond) => "bond",
                _ => {
                    if ctrl.datapath.vswitch_has_bridge(name) {
                        "bridge"
                    } else {
                        "unknown"
                    }
                }
            }
            .to_string();
        }
    }

    if net.network_type != "loopback" {
        let used_by = match &driver {
            Some(driver) => driver.used_by(),
            None => ctrl.usage.used_by(project, name, false),
        };
        net.used_by = used_by
            .into_iter()
            .filter(|url| ctrl.authorizer.can_view_url(url))
            .collect();
    }

    if let Some(driver) = &driver {
        net.status = if all_nodes {
            driver.status()
        } else {
            driver.local_status()
        };
        net.locations = driver.locations().to_vec();
    }

    Ok(net)
}

// ── Update & patch ────────────────────────────────────────────────

/// `PUT /1.0/networks/{name}`
pub async fn update_network(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(req): Json<NetworkPut>,
) -> Response {
    handle_update(ctrl, name, params, headers, req, false).await
}

/// `PATCH /1.0/networks/{name}`
pub async fn patch_network(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(req): Json<NetworkPut>,
) -> Response {
    handle_update(ctrl, name, params, headers, req, true).await
}

async fn handle_update(
    ctrl: Controller,
    name: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
    req: NetworkPut,
    patch: bool,
) -> Response {
    let method = if patch { "PATCH" } else { "PUT" };
    let body = serde_json::to_value(&req).ok();
    match forward_if_remote(&ctrl, &params, method, format!("/networks/{name}"), body).await {
        Ok(Some(response)) => return response,
        Ok(None) => {}
        Err(e) => return e.into_response(),
    }

    let if_match = headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok());

    let result = update_network_inner(
        &ctrl,
        params.get("project").map(String::as_str),
        params.get("target").map(String::as_str),
        &name,
        if_match,
        patch,
        client_type_from(&headers),
        &requestor_from(&headers),
        req,
    )
    .await;

    match result {
        Ok(()) => SyncResponse::new(()).into_response(),
        Err(e) => e.into_response(),
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn update_network_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    target: Option<&str>,
    name: &str,
    if_match: Option<&str>,
    patch: bool,
    client_type: ClientType,
    requestor: &str,
    mut req: NetworkPut,
) -> ApiResult<()> {
    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    let driver = load_by_name(ctrl.driver_ctx(), &project, name)?;
    if !network_allowed(&req_config, name, true) {
        return Err(ApiError::network_not_found());
    }

    let clustered = ctrl.clustered()?;

    if target.is_none() && driver.status() != NetworkStatus::Created {
        return Err(ApiError::BadRequest(
            "Cannot update network global config when not in created state".to_string(),
        ));
    }

    // The ETag must cover the same view a target-less GET returned.
    let mut etag_config = driver.config().clone();
    if target.is_none() && clustered {
        etag_config = strip_node_specific(&etag_config);
    }
    let current = network_etag(
        driver.name(),
        true,
        driver.network_type(),
        driver.description(),
        &etag_config,
    );
    check_etag(if_match, &current)?;

    // Key scope: a target-less update may only change global keys, a
    // targeted one only member-specific keys.
    if clustered {
        let current_config = driver.config();
        for (key, value) in &req.config {
            if current_config.get(key) == Some(value) {
                continue;
            }
            if target.is_none() && netgrid_catalog::is_node_specific(key) {
                return Err(ApiError::BadRequest(format!(
                    "Config key {key:?} is cluster member specific"
                )));
            }
            if target.is_some() && !netgrid_catalog::is_node_specific(key) {
                return Err(ApiError::BadRequest(format!(
                    "Config key {key:?} may not be used as member-specific key"
                )));
            }
        }
    }

    if target.is_none() && !patch && clustered {
        // A global PUT must not wipe per-member settings it cannot see.
        for (key, value) in driver.config() {
            if netgrid_catalog::is_node_specific(key) {
                req.config.insert(key.clone(), value.clone());
            }
        }
    } else if patch {
        for (key, value) in driver.config() {
            req.config.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    driver.validate(&req.config)?;

    driver.update(req, target, client_type).await?;

    ctrl.events.send_lifecycle(LifecycleEvent::network(
        NETWORK_UPDATED,
        &project,
        name,
        requestor,
    ));
    Ok(())
}

// ── Rename ────────────────────────────────────────────────────────

/// `POST /1.0/networks/{name}`
pub async fn rename_network(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(req): Json<NetworkPost>,
) -> Response {
    let result = rename_network_inner(
        &ctrl,
        params.get("project").map(String::as_str),
        &name,
        &requestor_from(&headers),
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

pub(crate) async fn rename_network_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    name: &str,
    requestor: &str,
    req: NetworkPost,
) -> ApiResult<String> {
    // Peers start networks from the renamed record, which cannot be
    // sequenced with notifications. Refused until that changes.
    if ctrl.clustered()? {
        return Err(ApiError::BadRequest(
            "Renaming clustered network not supported".to_string(),
        ));
    }

    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    let driver = load_by_name(ctrl.driver_ctx(), &project, name)?;
    if !network_allowed(&req_config, name, true) {
        return Err(ApiError::network_not_found());
    }

    if driver.status() != NetworkStatus::Created {
        return Err(ApiError::BadRequest(
            "Cannot rename network when not in created state".to_string(),
        ));
    }

    if req.name.is_empty() {
        return Err(ApiError::BadRequest(
            "New network name not provided".to_string(),
        ));
    }
    driver.validate_name(&req.name)?;

    if driver.is_used(false) {
        return Err(ApiError::BadRequest(
            "Network is currently in use".to_string(),
        ));
    }

    if ctrl.catalog.list_networks(&project)?.contains(&req.name) {
        return Err(ApiError::Conflict(format!(
            "Network {:?} already exists",
            req.name
        )));
    }

    driver.rename(&req.name).await?;

    if let Err(e) = ctrl.authorizer.rename_network(&project, name, &req.name) {
        error!(old = %name, new = %req.name, %project, error = %e, "failed to rename network in authorizer");
    }

    ctrl.events.send_lifecycle(
        LifecycleEvent::network(NETWORK_RENAMED, &project, &req.name, requestor)
            .with_context("old_name", name),
    );

    Ok(format!("/{API_VERSION}/networks/{}", req.name))
}

// ── Delete ────────────────────────────────────────────────────────

/// `DELETE /1.0/networks/{name}`
pub async fn delete_network(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let result = delete_network_inner(
        &ctrl,
        params.get("project").map(String::as_str),
        &name,
        client_type_from(&headers),
        &requestor_from(&headers),
    )
    .await;

    match result {
        Ok(()) => SyncResponse::new(()).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn delete_network_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    name: &str,
    client_type: ClientType,
    requestor: &str,
) -> ApiResult<()> {
    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    let driver = load_by_name(ctrl.driver_ctx(), &project, name)?;
    if !network_allowed(&req_config, name, true) {
        return Err(ApiError::network_not_found());
    }

    let notification = is_cluster_notification(client_type);
    if !notification && driver.is_used(false) {
        return Err(ApiError::BadRequest(
            "The network is currently in use".to_string(),
        ));
    }

    // A member that never actuated has nothing to tear down.
    if driver.local_status() != NetworkStatus::Pending {
        driver
            .delete(client_type)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    // Catalog work belongs to the member serving the original request.
    if notification {
        return Ok(());
    }

    if ctrl.clustered()? {
        let notifier = ctrl.cluster.notifier(&ctrl.catalog, NotifyScope::All)?;
        let del_project = driver.project().to_string();
        let del_name = driver.name().to_string();
        notifier
            .notify(move |_member, client| {
                let del_project = del_project.clone();
                let del_name = del_name.clone();
                Box::pin(async move { client.delete_network(&del_project, &del_name).await })
            })
            .await?;
    }

    ctrl.catalog.delete_network(driver.project(), driver.name())?;

    if let Err(e) = ctrl.authorizer.remove_network(&project, name) {
        error!(%name, %project, error = %e, "failed to remove network from authorizer");
    }

    ctrl.events.send_lifecycle(LifecycleEvent::network(
        NETWORK_DELETED,
        &project,
        name,
        requestor,
    ));
    Ok(())
}

// ── Leases & state ────────────────────────────────────────────────

/// `GET /1.0/networks/{name}/leases`
pub async fn network_leases(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let result = network_leases_inner(
        &ctrl,
        params.get("project").map(String::as_str),
        &name,
        client_type_from(&headers),
    )
    .await;

    match result {
        Ok(leases) => SyncResponse::new(leases).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn network_leases_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    name: &str,
    client_type: ClientType,
) -> ApiResult<Vec<netgrid_core::NetworkLease>> {
    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    let driver = load_by_name(ctrl.driver_ctx(), &project, name)?;
    if !network_allowed(&req_config, name, true) {
        return Err(ApiError::network_not_found());
    }

    Ok(driver.leases(&project, client_type).await?)
}

/// `GET /1.0/networks/{name}/state`
pub async fn network_state(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match forward_if_remote(
        &ctrl,
        &params,
        "GET",
        format!("/networks/{name}/state"),
        None,
    )
    .await
    {
        Ok(Some(response)) => return response,
        Ok(None) => {}
        Err(e) => return e.into_response(),
    }

    let result =
        network_state_inner(&ctrl, params.get("project").map(String::as_str), &name).await;

    match result {
        Ok(state) => SyncResponse::new(state).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn network_state_inner(
    ctrl: &Controller,
    project_param: Option<&str>,
    name: &str,
) -> ApiResult<netgrid_core::NetworkState> {
    let (project, req_config) = network_project(&ctrl.catalog, project_param)?;

    let driver = match load_by_name(ctrl.driver_ctx(), &project, name) {
        Ok(driver) => Some(driver),
        Err(DriverError::NotFound) => None,
        Err(e) => return Err(e.into()),
    };

    if !network_allowed(&req_config, name, driver.is_some()) {
        return Err(ApiError::network_not_found());
    }

    match driver {
        Some(driver) => Ok(driver.state().await?),
        // Unmanaged interfaces report straight from the host probe.
        None => ctrl
            .datapath
            .interface_state(name)
            .map_err(|_| ApiError::network_not_found()),
    }
}
