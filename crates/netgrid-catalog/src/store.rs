//! Catalog — transactional operations on the replicated network catalog.
//!
//! Every operation that reads-then-writes runs inside one redb write
//! transaction so concurrent callers observe a consistent record. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use netgrid_core::NetworkStatus;

use crate::error::{CatalogError, CatalogResult};
use crate::node_config::is_node_specific;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `CatalogError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| CatalogError::$variant(e.to_string())
    };
}

/// A member-scoped view of one network: the global row, the merged config
/// for that member, its local status and the set of members the network
/// is defined on.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkView {
    pub record: NetworkRecord,
    /// Global config merged with the member's node-specific fragment.
    pub config: HashMap<String, String>,
    /// The global fragment alone.
    pub global_config: HashMap<String, String>,
    pub local_status: NetworkStatus,
    pub locations: Vec<String>,
}

/// Thread-safe catalog gateway backed by redb.
#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    /// Open (or create) a persistent catalog at the given path.
    pub fn open(path: &Path) -> CatalogResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let catalog = Self { db: Arc::new(db) };
        catalog.ensure_tables()?;
        debug!(?path, "catalog opened");
        Ok(catalog)
    }

    /// Create an ephemeral in-memory catalog (for testing).
    pub fn open_in_memory() -> CatalogResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let catalog = Self { db: Arc::new(db) };
        catalog.ensure_tables()?;
        Ok(catalog)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> CatalogResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        txn.open_table(NETWORK_NODES).map_err(map_err!(Table))?;
        txn.open_table(NETWORK_CONFIG).map_err(map_err!(Table))?;
        txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        txn.open_table(WARNINGS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    // ── Members ────────────────────────────────────────────────────

    /// Insert or update a cluster member.
    pub fn put_member(&self, member: &MemberRecord) -> CatalogResult<()> {
        let value = serde_json::to_vec(member).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            table
                .insert(member.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all cluster members, sorted by name.
    pub fn list_members(&self) -> CatalogResult<Vec<MemberRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        let mut members = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let member: MemberRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            members.push(member);
        }
        members.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(members)
    }

    /// Number of cluster members.
    pub fn member_count(&self) -> CatalogResult<usize> {
        Ok(self.list_members()?.len())
    }

    /// Remove a member. Returns true if it existed.
    pub fn delete_member(&self, name: &str) -> CatalogResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Projects ───────────────────────────────────────────────────

    /// Insert or update a project record.
    pub fn put_project(&self, project: &ProjectRecord) -> CatalogResult<()> {
        let value = serde_json::to_vec(project).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            table
                .insert(project.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a project by name.
    pub fn get_project(&self, name: &str) -> CatalogResult<Option<ProjectRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let project: ProjectRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(project))
            }
            None => Ok(None),
        }
    }

    /// List all project names, sorted.
    pub fn project_names(&self) -> CatalogResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            names.push(key.value().to_string());
        }
        names.sort();
        Ok(names)
    }

    // ── Network listing ────────────────────────────────────────────

    /// List managed network names in a project, sorted.
    pub fn list_networks(&self, project: &str) -> CatalogResult<Vec<String>> {
        let prefix = format!("{project}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some(name) = key.value().strip_prefix(&prefix) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// List managed network names for every project.
    pub fn list_all_projects_networks(&self) -> CatalogResult<HashMap<String, Vec<String>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: NetworkRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            result.entry(record.project).or_default().push(record.name);
        }
        Ok(result.into_iter().collect())
    }

    /// List names of networks in `created` state in a project, sorted.
    pub fn list_created_networks(&self, project: &str) -> CatalogResult<Vec<String>> {
        let prefix = format!("{project}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let record: NetworkRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.status == NetworkStatus::Created {
                names.push(record.name);
            }
        }
        names.sort();
        Ok(names)
    }

    // ── Network reads ──────────────────────────────────────────────

    /// Get a network's id. Errors with `not_found` if absent.
    pub fn get_network_id(&self, project: &str, name: &str) -> CatalogResult<u64> {
        let record = self
            .get_record(project, name)?
            .ok_or_else(|| not_found(project, name))?;
        Ok(record.id)
    }

    /// Get the raw network record regardless of status.
    pub fn get_record(&self, project: &str, name: &str) -> CatalogResult<Option<NetworkRecord>> {
        let key = network_key(project, name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: NetworkRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Get a member-scoped view of a network regardless of status.
    /// Errors with `not_found` if no record exists.
    pub fn get_network_in_any_state(
        &self,
        project: &str,
        name: &str,
        member: &str,
    ) -> CatalogResult<NetworkView> {
        let record = self
            .get_record(project, name)?
            .ok_or_else(|| not_found(project, name))?;

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;

        let global_config = read_config_fragment(&txn, record.id, "")?;
        let member_config = read_config_fragment(&txn, record.id, member)?;

        let mut config = global_config.clone();
        config.extend(member_config);

        let nodes_table = txn.open_table(NETWORK_NODES).map_err(map_err!(Table))?;
        let prefix = format!("{}:", record.id);
        let mut locations = Vec::new();
        let mut local_status = NetworkStatus::Unknown;
        for entry in nodes_table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let node: NetworkNodeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if node.member == member {
                local_status = node.status;
            }
            locations.push(node.member);
        }
        locations.sort();

        Ok(NetworkView {
            record,
            config,
            global_config,
            local_status,
            locations,
        })
    }

    /// Raw config fragment for one member ("" for the global fragment).
    pub fn network_config(&self, id: u64, member: &str) -> CatalogResult<HashMap<String, String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        read_config_fragment(&txn, id, member)
    }

    /// Per-member config fragments for a network, verifying that every
    /// cluster member has defined it. The global fragment is excluded.
    pub fn network_node_configs(
        &self,
        id: u64,
    ) -> CatalogResult<HashMap<String, HashMap<String, String>>> {
        let members = self.list_members()?;

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let nodes_table = txn.open_table(NETWORK_NODES).map_err(map_err!(Table))?;

        let prefix = format!("{id}:");
        let mut defined = Vec::new();
        for entry in nodes_table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let node: NetworkNodeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            defined.push(node.member);
        }

        let missing: Vec<String> = members
            .iter()
            .filter(|m| !defined.contains(&m.name))
            .map(|m| m.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(CatalogError::Conflict(format!(
                "network not defined on members: {}",
                missing.join(", ")
            )));
        }

        let mut configs = HashMap::new();
        for member in defined {
            let fragment = read_config_fragment(&txn, id, &member)?;
            configs.insert(member, fragment);
        }
        Ok(configs)
    }

    // ── Network writes ─────────────────────────────────────────────

    /// Insert a pending per-member definition of a network, creating the
    /// global row on first use. Fails with `already_defined` when the
    /// member already carries this network.
    pub fn create_pending_network(
        &self,
        member: &str,
        project: &str,
        name: &str,
        description: &str,
        network_type: &str,
        config: &HashMap<String, String>,
    ) -> CatalogResult<u64> {
        let key = network_key(project, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;

            let existing = match networks.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<NetworkRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            match existing {
                Some(record) => {
                    if record.network_type != network_type {
                        return Err(CatalogError::Conflict(format!(
                            "network {name:?} of type {:?} already defined",
                            record.network_type
                        )));
                    }
                    id = record.id;
                }
                None => {
                    id = next_network_id(&txn)?;
                    let record = NetworkRecord {
                        id,
                        project: project.to_string(),
                        name: name.to_string(),
                        network_type: network_type.to_string(),
                        description: description.to_string(),
                        status: NetworkStatus::Pending,
                    };
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    networks
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }

            let mut nodes = txn.open_table(NETWORK_NODES).map_err(map_err!(Table))?;
            let node_key = format!("{id}:{member}");
            if nodes.get(node_key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(CatalogError::AlreadyDefined(format!(
                    "network {name:?} is already defined on member {member:?}"
                )));
            }

            let node = NetworkNodeRecord {
                member: member.to_string(),
                status: NetworkStatus::Pending,
            };
            let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
            nodes
                .insert(node_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            if !config.is_empty() {
                write_config_fragment(&txn, id, member, config, true)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project, %name, %member, id, "pending network defined");
        Ok(id)
    }

    /// Insert a complete network record (single-member path). The config
    /// is split into the global fragment and the member's node-specific
    /// fragment. Fails with `conflict` if the record exists.
    pub fn create_network(
        &self,
        member: &str,
        project: &str,
        name: &str,
        description: &str,
        network_type: &str,
        config: &HashMap<String, String>,
    ) -> CatalogResult<u64> {
        let key = network_key(project, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
            if networks.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(CatalogError::Conflict(format!(
                    "network {name:?} already exists"
                )));
            }

            id = next_network_id(&txn)?;
            let record = NetworkRecord {
                id,
                project: project.to_string(),
                name: name.to_string(),
                network_type: network_type.to_string(),
                description: description.to_string(),
                status: NetworkStatus::Created,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            networks
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut nodes = txn.open_table(NETWORK_NODES).map_err(map_err!(Table))?;
            let node = NetworkNodeRecord {
                member: member.to_string(),
                status: NetworkStatus::Pending,
            };
            let node_value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
            nodes
                .insert(format!("{id}:{member}").as_str(), node_value.as_slice())
                .map_err(map_err!(Write))?;

            let mut global = HashMap::new();
            let mut local = HashMap::new();
            for (k, v) in config {
                if is_node_specific(k) {
                    local.insert(k.clone(), v.clone());
                } else {
                    global.insert(k.clone(), v.clone());
                }
            }
            write_config_fragment(&txn, id, "", &global, false)?;
            if !local.is_empty() {
                write_config_fragment(&txn, id, member, &local, false)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project, %name, id, "network created");
        Ok(id)
    }

    /// Insert a config fragment for a member ("" for global), merging
    /// into any existing fragment.
    pub fn create_network_config(
        &self,
        id: u64,
        member: &str,
        config: &HashMap<String, String>,
    ) -> CatalogResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        write_config_fragment(&txn, id, member, config, true)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The atomic first half of a cluster commit: verify the network is
    /// defined on every member, insert the global config fragment, and
    /// pre-mark the record errored so a crash mid-protocol leaves a
    /// recoverable state. Returns the per-member config fragments for
    /// the fan-out. Errors with `not_found` when the network was never
    /// defined anywhere and `conflict` when members are missing.
    pub fn commit_global_config(
        &self,
        project: &str,
        name: &str,
        config: &HashMap<String, String>,
    ) -> CatalogResult<HashMap<String, HashMap<String, String>>> {
        let key = network_key(project, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let node_configs;
        {
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
            let mut record = match networks.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<NetworkRecord>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => return Err(not_found(project, name)),
            };
            let id = record.id;

            let members: Vec<String> = {
                let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
                let mut names = Vec::new();
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (key, _) = entry.map_err(map_err!(Read))?;
                    names.push(key.value().to_string());
                }
                names
            };

            let defined: Vec<String> = {
                let table = txn.open_table(NETWORK_NODES).map_err(map_err!(Table))?;
                let prefix = format!("{id}:");
                let mut names = Vec::new();
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    if !key.value().starts_with(&prefix) {
                        continue;
                    }
                    let node: NetworkNodeRecord = serde_json::from_slice(value.value())
                        .map_err(map_err!(Deserialize))?;
                    names.push(node.member);
                }
                names
            };

            let missing: Vec<String> = members
                .into_iter()
                .filter(|m| !defined.contains(m))
                .collect();
            if !missing.is_empty() {
                return Err(CatalogError::Conflict(format!(
                    "network not defined on members: {}",
                    missing.join(", ")
                )));
            }

            let mut configs = HashMap::new();
            {
                let table = txn.open_table(NETWORK_CONFIG).map_err(map_err!(Table))?;
                for member in defined {
                    let fragment_key = format!("{id}/{member}");
                    let fragment = match table.get(fragment_key.as_str()).map_err(map_err!(Read))? {
                        Some(guard) => serde_json::from_slice(guard.value())
                            .map_err(map_err!(Deserialize))?,
                        None => HashMap::new(),
                    };
                    configs.insert(member, fragment);
                }
            }
            node_configs = configs;

            write_config_fragment(&txn, id, "", config, true)?;

            record.status = NetworkStatus::Errored;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            networks
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project, %name, "global config inserted, record pre-marked errored");
        Ok(node_configs)
    }

    /// Mark the network's global status as created.
    pub fn network_created(&self, project: &str, name: &str) -> CatalogResult<()> {
        self.set_status(project, name, NetworkStatus::Created)
    }

    /// Mark the network's global status as errored.
    pub fn network_errored(&self, project: &str, name: &str) -> CatalogResult<()> {
        self.set_status(project, name, NetworkStatus::Errored)
    }

    fn set_status(&self, project: &str, name: &str, status: NetworkStatus) -> CatalogResult<()> {
        let key = network_key(project, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
            let mut record = match networks.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<NetworkRecord>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => return Err(not_found(project, name)),
            };
            record.status = status;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            networks
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project, %name, %status, "network global status set");
        Ok(())
    }

    /// Mark one member's local status as created.
    pub fn network_node_created(&self, id: u64, member: &str) -> CatalogResult<()> {
        let node_key = format!("{id}:{member}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut nodes = txn.open_table(NETWORK_NODES).map_err(map_err!(Table))?;
            let mut node = match nodes.get(node_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<NetworkNodeRecord>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => {
                    return Err(CatalogError::NotFound(format!(
                        "network {id} has no row for member {member:?}"
                    )))
                }
            };
            node.status = NetworkStatus::Created;
            let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
            nodes
                .insert(node_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, %member, "network local status set to created");
        Ok(())
    }

    /// Replace a network's description and config as seen by one member.
    /// The merged config is split back into the global fragment and the
    /// member's node-specific fragment.
    pub fn update_network(
        &self,
        project: &str,
        name: &str,
        member: &str,
        description: &str,
        config: &HashMap<String, String>,
    ) -> CatalogResult<()> {
        let key = network_key(project, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
            let mut record = match networks.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<NetworkRecord>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => return Err(not_found(project, name)),
            };
            record.description = description.to_string();
            let id = record.id;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            networks
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut global = HashMap::new();
            let mut local = HashMap::new();
            for (k, v) in config {
                if is_node_specific(k) {
                    local.insert(k.clone(), v.clone());
                } else {
                    global.insert(k.clone(), v.clone());
                }
            }
            write_config_fragment(&txn, id, "", &global, false)?;
            write_config_fragment(&txn, id, member, &local, false)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project, %name, %member, "network updated");
        Ok(())
    }

    /// Rename a network record in place. Errors with `conflict` if the
    /// new name is taken and `not_found` if the old name is absent.
    pub fn rename_network(&self, project: &str, old: &str, new: &str) -> CatalogResult<()> {
        let old_key = network_key(project, old);
        let new_key = network_key(project, new);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
            if networks.get(new_key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(CatalogError::Conflict(format!(
                    "network {new:?} already exists"
                )));
            }
            let mut record = match networks.remove(old_key.as_str()).map_err(map_err!(Write))? {
                Some(guard) => serde_json::from_slice::<NetworkRecord>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => return Err(not_found(project, old)),
            };
            record.name = new.to_string();
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            networks
                .insert(new_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project, %old, %new, "network renamed");
        Ok(())
    }

    /// Delete a network record with all its node rows and config
    /// fragments. Errors with `not_found` if absent.
    pub fn delete_network(&self, project: &str, name: &str) -> CatalogResult<()> {
        let key = network_key(project, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
            let record = match networks.remove(key.as_str()).map_err(map_err!(Write))? {
                Some(guard) => serde_json::from_slice::<NetworkRecord>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => return Err(not_found(project, name)),
            };

            remove_prefixed(&txn, NETWORK_NODES, &format!("{}:", record.id))?;
            remove_prefixed(&txn, NETWORK_CONFIG, &format!("{}/", record.id))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project, %name, "network deleted");
        Ok(())
    }
}

fn not_found(project: &str, name: &str) -> CatalogError {
    CatalogError::NotFound(format!("network {name:?} not found in project {project:?}"))
}

fn next_network_id(txn: &redb::WriteTransaction) -> CatalogResult<u64> {
    let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
    let next = counters
        .get(NETWORK_ID_COUNTER)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0)
        + 1;
    counters
        .insert(NETWORK_ID_COUNTER, next)
        .map_err(map_err!(Write))?;
    Ok(next)
}

fn read_config_fragment(
    txn: &redb::ReadTransaction,
    id: u64,
    member: &str,
) -> CatalogResult<HashMap<String, String>> {
    let table = txn.open_table(NETWORK_CONFIG).map_err(map_err!(Table))?;
    let key = format!("{id}/{member}");
    match table.get(key.as_str()).map_err(map_err!(Read))? {
        Some(guard) => {
            serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
        }
        None => Ok(HashMap::new()),
    }
}

fn write_config_fragment(
    txn: &redb::WriteTransaction,
    id: u64,
    member: &str,
    config: &HashMap<String, String>,
    merge: bool,
) -> CatalogResult<()> {
    let mut table = txn.open_table(NETWORK_CONFIG).map_err(map_err!(Table))?;
    let key = format!("{id}/{member}");

    let mut fragment = if merge {
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice::<HashMap<String, String>>(guard.value())
                .map_err(map_err!(Deserialize))?,
            None => HashMap::new(),
        }
    } else {
        HashMap::new()
    };
    fragment.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));

    let value = serde_json::to_vec(&fragment).map_err(map_err!(Serialize))?;
    table
        .insert(key.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn remove_prefixed(
    txn: &redb::WriteTransaction,
    def: redb::TableDefinition<&str, &[u8]>,
    prefix: &str,
) -> CatalogResult<()> {
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    let keys: Vec<String> = table
        .iter()
        .map_err(map_err!(Read))?
        .filter_map(|entry| {
            let (key, _) = entry.ok()?;
            let k = key.value().to_string();
            k.starts_with(prefix).then_some(k)
        })
        .collect();
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_catalog() -> Catalog {
        Catalog::open_in_memory().unwrap()
    }

    fn member(name: &str) -> MemberRecord {
        MemberRecord {
            name: name.to_string(),
            address: format!("10.0.0.{}:8443", name.len()),
            alive: true,
        }
    }

    fn clustered_catalog(members: &[&str]) -> Catalog {
        let catalog = test_catalog();
        for m in members {
            catalog.put_member(&member(m)).unwrap();
        }
        catalog
    }

    // ── Single-member create ───────────────────────────────────────

    #[test]
    fn create_network_and_read_back() {
        let catalog = test_catalog();
        let config = HashMap::from([("ipv4.address".to_string(), "10.1.1.1/24".to_string())]);

        let id = catalog
            .create_network("a", "default", "br0", "lan", "bridge", &config)
            .unwrap();

        let view = catalog
            .get_network_in_any_state("default", "br0", "a")
            .unwrap();
        assert_eq!(view.record.id, id);
        assert_eq!(catalog.get_network_id("default", "br0").unwrap(), id);
        assert_eq!(view.record.status, NetworkStatus::Created);
        assert_eq!(view.local_status, NetworkStatus::Pending);
        assert_eq!(view.locations, vec!["a".to_string()]);
        assert_eq!(
            view.config.get("ipv4.address").map(String::as_str),
            Some("10.1.1.1/24")
        );
    }

    #[test]
    fn create_network_splits_node_specific_config() {
        let catalog = test_catalog();
        let config = HashMap::from([
            ("parent".to_string(), "eth0".to_string()),
            ("mtu".to_string(), "9000".to_string()),
        ]);

        let id = catalog
            .create_network("a", "default", "phys0", "", "physical", &config)
            .unwrap();

        let global = catalog.network_config(id, "").unwrap();
        assert!(!global.contains_key("parent"));
        assert_eq!(global.get("mtu").map(String::as_str), Some("9000"));

        let local = catalog.network_config(id, "a").unwrap();
        assert_eq!(local.get("parent").map(String::as_str), Some("eth0"));
    }

    #[test]
    fn create_network_duplicate_conflicts() {
        let catalog = test_catalog();
        catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();

        let err = catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn fresh_id_after_delete_and_recreate() {
        let catalog = test_catalog();
        let first = catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();
        catalog.delete_network("default", "br0").unwrap();
        let second = catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();
        assert!(second > first);
    }

    // ── Pending definitions ────────────────────────────────────────

    #[test]
    fn pending_rows_accumulate_locations() {
        let catalog = clustered_catalog(&["a", "b", "c"]);

        for m in ["a", "b", "c"] {
            let config = HashMap::from([("parent".to_string(), format!("eth-{m}"))]);
            catalog
                .create_pending_network(m, "default", "n1", "", "physical", &config)
                .unwrap();
        }

        let view = catalog
            .get_network_in_any_state("default", "n1", "b")
            .unwrap();
        assert_eq!(view.record.status, NetworkStatus::Pending);
        assert_eq!(view.local_status, NetworkStatus::Pending);
        assert_eq!(view.locations, vec!["a", "b", "c"]);
        assert_eq!(view.config.get("parent").map(String::as_str), Some("eth-b"));
    }

    #[test]
    fn pending_twice_on_same_member_is_already_defined() {
        let catalog = clustered_catalog(&["a"]);
        catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();

        let err = catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap_err();
        assert!(err.is_already_defined());
    }

    #[test]
    fn pending_with_mismatched_type_conflicts() {
        let catalog = clustered_catalog(&["a", "b"]);
        catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();

        let err = catalog
            .create_pending_network("b", "default", "n1", "", "bridge", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn node_configs_require_all_members_defined() {
        let catalog = clustered_catalog(&["a", "b", "c"]);
        let id = catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();

        let err = catalog.network_node_configs(id).unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
        assert!(err.to_string().contains("b"));

        catalog
            .create_pending_network("b", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();
        catalog
            .create_pending_network("c", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();

        let configs = catalog.network_node_configs(id).unwrap();
        assert_eq!(configs.len(), 3);
    }

    // ── Status transitions ─────────────────────────────────────────

    #[test]
    fn status_transitions() {
        let catalog = clustered_catalog(&["a"]);
        let id = catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();

        catalog.network_errored("default", "n1").unwrap();
        let record = catalog.get_record("default", "n1").unwrap().unwrap();
        assert_eq!(record.status, NetworkStatus::Errored);

        catalog.network_node_created(id, "a").unwrap();
        catalog.network_created("default", "n1").unwrap();

        let view = catalog
            .get_network_in_any_state("default", "n1", "a")
            .unwrap();
        assert_eq!(view.record.status, NetworkStatus::Created);
        assert_eq!(view.local_status, NetworkStatus::Created);
    }

    #[test]
    fn status_transition_on_missing_network_is_not_found() {
        let catalog = test_catalog();
        assert!(catalog.network_created("default", "ghost").unwrap_err().is_not_found());
        assert!(catalog.network_errored("default", "ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn commit_global_config_inserts_and_premarks_errored() {
        let catalog = clustered_catalog(&["a", "b"]);
        for m in ["a", "b"] {
            catalog
                .create_pending_network(
                    m,
                    "default",
                    "n1",
                    "",
                    "physical",
                    &HashMap::from([("parent".to_string(), format!("eth-{m}"))]),
                )
                .unwrap();
        }

        let node_configs = catalog
            .commit_global_config(
                "default",
                "n1",
                &HashMap::from([("mtu".to_string(), "9000".to_string())]),
            )
            .unwrap();

        assert_eq!(node_configs.len(), 2);
        assert_eq!(
            node_configs["b"].get("parent").map(String::as_str),
            Some("eth-b")
        );

        let record = catalog.get_record("default", "n1").unwrap().unwrap();
        assert_eq!(record.status, NetworkStatus::Errored);
        assert_eq!(
            catalog
                .network_config(record.id, "")
                .unwrap()
                .get("mtu")
                .map(String::as_str),
            Some("9000")
        );
    }

    #[test]
    fn commit_global_config_requires_every_member() {
        let catalog = clustered_catalog(&["a", "b"]);
        catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();

        let err = catalog
            .commit_global_config("default", "n1", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));

        // Nothing was inserted and the status is untouched.
        let record = catalog.get_record("default", "n1").unwrap().unwrap();
        assert_eq!(record.status, NetworkStatus::Pending);
        assert!(catalog.network_config(record.id, "").unwrap().is_empty());
    }

    #[test]
    fn commit_global_config_on_undefined_network_is_not_found() {
        let catalog = clustered_catalog(&["a"]);
        let err = catalog
            .commit_global_config("default", "ghost", &HashMap::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    // ── Config fragments ───────────────────────────────────────────

    #[test]
    fn global_config_fragment_merges() {
        let catalog = clustered_catalog(&["a"]);
        let id = catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();

        catalog
            .create_network_config(
                id,
                "",
                &HashMap::from([("mtu".to_string(), "1500".to_string())]),
            )
            .unwrap();
        catalog
            .create_network_config(
                id,
                "",
                &HashMap::from([("vlan".to_string(), "10".to_string())]),
            )
            .unwrap();

        let global = catalog.network_config(id, "").unwrap();
        assert_eq!(global.len(), 2);
    }

    #[test]
    fn view_merges_global_and_member_fragments() {
        let catalog = clustered_catalog(&["a", "b"]);
        let id = catalog
            .create_pending_network(
                "a",
                "default",
                "n1",
                "",
                "physical",
                &HashMap::from([("parent".to_string(), "eth0".to_string())]),
            )
            .unwrap();
        catalog
            .create_pending_network("b", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();
        catalog
            .create_network_config(
                id,
                "",
                &HashMap::from([("mtu".to_string(), "9000".to_string())]),
            )
            .unwrap();

        let view_a = catalog
            .get_network_in_any_state("default", "n1", "a")
            .unwrap();
        assert_eq!(view_a.config.len(), 2);
        assert_eq!(view_a.global_config.len(), 1);

        let view_b = catalog
            .get_network_in_any_state("default", "n1", "b")
            .unwrap();
        assert!(!view_b.config.contains_key("parent"));
    }

    // ── Listing ────────────────────────────────────────────────────

    #[test]
    fn list_networks_by_project() {
        let catalog = test_catalog();
        catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();
        catalog
            .create_network("a", "default", "br1", "", "bridge", &HashMap::new())
            .unwrap();
        catalog
            .create_network("a", "tenant1", "ovn0", "", "ovn", &HashMap::new())
            .unwrap();

        assert_eq!(catalog.list_networks("default").unwrap(), vec!["br0", "br1"]);
        assert_eq!(catalog.list_networks("tenant1").unwrap(), vec!["ovn0"]);

        let all = catalog.list_all_projects_networks().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["default"], vec!["br0", "br1"]);
    }

    #[test]
    fn list_created_excludes_pending_and_errored() {
        let catalog = clustered_catalog(&["a"]);
        catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();
        catalog
            .create_pending_network("a", "default", "n1", "", "physical", &HashMap::new())
            .unwrap();
        catalog
            .create_pending_network("a", "default", "n2", "", "physical", &HashMap::new())
            .unwrap();
        catalog.network_errored("default", "n2").unwrap();

        assert_eq!(catalog.list_created_networks("default").unwrap(), vec!["br0"]);
    }

    // ── Delete ─────────────────────────────────────────────────────

    #[test]
    fn delete_removes_rows_and_fragments() {
        let catalog = clustered_catalog(&["a"]);
        let id = catalog
            .create_pending_network(
                "a",
                "default",
                "n1",
                "",
                "physical",
                &HashMap::from([("parent".to_string(), "eth0".to_string())]),
            )
            .unwrap();

        catalog.delete_network("default", "n1").unwrap();

        assert!(catalog.get_record("default", "n1").unwrap().is_none());
        assert!(catalog.network_config(id, "a").unwrap().is_empty());
        assert!(catalog
            .delete_network("default", "n1")
            .unwrap_err()
            .is_not_found());
    }

    // ── Update & rename ────────────────────────────────────────────

    #[test]
    fn update_replaces_description_and_fragments() {
        let catalog = test_catalog();
        let id = catalog
            .create_network(
                "a",
                "default",
                "phys0",
                "old",
                "physical",
                &HashMap::from([
                    ("parent".to_string(), "eth0".to_string()),
                    ("mtu".to_string(), "1500".to_string()),
                ]),
            )
            .unwrap();

        catalog
            .update_network(
                "default",
                "phys0",
                "a",
                "new",
                &HashMap::from([
                    ("parent".to_string(), "eth1".to_string()),
                    ("vlan".to_string(), "10".to_string()),
                ]),
            )
            .unwrap();

        let record = catalog.get_record("default", "phys0").unwrap().unwrap();
        assert_eq!(record.description, "new");

        let global = catalog.network_config(id, "").unwrap();
        assert_eq!(global.get("vlan").map(String::as_str), Some("10"));
        assert!(!global.contains_key("mtu"));

        let local = catalog.network_config(id, "a").unwrap();
        assert_eq!(local.get("parent").map(String::as_str), Some("eth1"));
    }

    #[test]
    fn rename_moves_record() {
        let catalog = test_catalog();
        catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();

        catalog.rename_network("default", "br0", "br9").unwrap();

        assert!(catalog.get_record("default", "br0").unwrap().is_none());
        let record = catalog.get_record("default", "br9").unwrap().unwrap();
        assert_eq!(record.name, "br9");
    }

    #[test]
    fn rename_to_taken_name_conflicts() {
        let catalog = test_catalog();
        catalog
            .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
            .unwrap();
        catalog
            .create_network("a", "default", "br1", "", "bridge", &HashMap::new())
            .unwrap();

        let err = catalog.rename_network("default", "br0", "br1").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    // ── Members & projects ─────────────────────────────────────────

    #[test]
    fn members_sorted_and_counted() {
        let catalog = clustered_catalog(&["c", "a", "b"]);
        let names: Vec<String> = catalog
            .list_members()
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(catalog.member_count().unwrap(), 3);

        assert!(catalog.delete_member("b").unwrap());
        assert_eq!(catalog.member_count().unwrap(), 2);
    }

    #[test]
    fn project_round_trip() {
        let catalog = test_catalog();
        let project = ProjectRecord {
            name: "tenant1".to_string(),
            config: HashMap::from([("features.networks".to_string(), "true".to_string())]),
        };
        catalog.put_project(&project).unwrap();

        assert_eq!(catalog.get_project("tenant1").unwrap(), Some(project));
        assert!(catalog.get_project("ghost").unwrap().is_none());
        assert_eq!(catalog.project_names().unwrap(), vec!["tenant1"]);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.redb");

        {
            let catalog = Catalog::open(&db_path).unwrap();
            catalog
                .create_network("a", "default", "br0", "", "bridge", &HashMap::new())
                .unwrap();
        }

        let catalog = Catalog::open(&db_path).unwrap();
        let record = catalog.get_record("default", "br0").unwrap();
        assert!(record.is_some());
        assert_eq!(record.unwrap().network_type, "bridge");
    }
}
