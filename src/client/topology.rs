//! Connection topology resolution
//!
//! A [`ConnectionDescriptor`] is a parsed descriptor with its topology rules
//! applied: host cardinality, credential and priority checks, replication
//! roles and the session hints each mode needs. Resolved descriptors are
//! immutable and cached in a [`DescriptorCache`].

use super::connection_string::{HaMode, HostSpec, ParsedDescriptor};
use crate::connection::{parse_bool, ConnectionConfig, DEFAULT_PORT};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Property injected into failover and load-balanced topologies
const LOCAL_SESSION_STATE: &str = "useLocalSessionState";
const ALLOW_DUPLICATE_HOSTS: &str = "allowDuplicateHosts";
const AUTO_COMMIT_SWAP_THRESHOLD: &str = "autoCommitSwapThreshold";

/// Highest accepted `priority=` value
pub const MAX_PRIORITY: u8 = 100;

/// Role of a host inside its topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRole {
    /// No role given and none derived
    Undefined,
    /// Accepts writes
    Master,
    /// Read-only copy
    Replica,
    /// Rank in a priority topology; higher is tried first
    Priority(u8),
}

/// One resolved host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// User for this host
    pub user: String,
    /// Password for this host
    pub password: Option<String>,
    /// Global properties merged with this host's overrides
    pub properties: BTreeMap<String, String>,
    /// Topology role
    pub role: HostRole,
}

impl HostEndpoint {
    /// `host:port`, bracketing IPv6 addresses
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Session configuration for this host
    ///
    /// `user` and `password` come from the endpoint; every other property
    /// goes through [`ConnectionConfigBuilder::properties`].
    ///
    /// [`ConnectionConfigBuilder::properties`]: crate::connection::ConnectionConfigBuilder::properties
    pub fn config(&self, database: Option<&str>) -> Result<ConnectionConfig> {
        let mut properties = self.properties.clone();
        properties.remove("user");
        properties.remove("password");

        let mut builder = ConnectionConfig::builder(&self.host, &self.user)
            .port(self.port)
            .properties(&properties)?;
        if let Some(password) = &self.password {
            builder = builder.password(password);
        }
        if let Some(database) = database {
            builder = builder.database(database);
        }
        Ok(builder.build())
    }
}

/// Behaviour attached to sessions of a load-balanced topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interceptor {
    /// Move to another host after `threshold` auto-committed statements
    AutoCommitSwap {
        /// Statements before swapping
        threshold: u32,
    },
}

/// A resolved connection descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    raw: String,
    mode: HaMode,
    hosts: Vec<HostEndpoint>,
    database: Option<String>,
    user: String,
    password: Option<String>,
    properties: BTreeMap<String, String>,
    interceptors: Vec<Interceptor>,
}

impl ConnectionDescriptor {
    /// Parse `raw` and apply topology rules
    ///
    /// Properties in the descriptor override `overlay`; per-host attributes
    /// override both.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn example() -> mariadb_wire::Result<()> {
    /// use mariadb_wire::client::{ConnectionDescriptor, HaMode};
    /// use std::collections::BTreeMap;
    ///
    /// let d = ConnectionDescriptor::resolve(
    ///     "mariadb:failover://app@db1,db2:3307/shop",
    ///     &BTreeMap::new(),
    /// )?;
    /// assert_eq!(d.mode(), HaMode::Failover);
    /// assert_eq!(d.hosts()[1].port, 3307);
    /// # Ok(())
    /// # }
    /// ```
    pub fn resolve(raw: &str, overlay: &BTreeMap<String, String>) -> Result<Self> {
        let parsed = ParsedDescriptor::parse(raw)?;
        let mode = parsed.mode.unwrap_or(HaMode::Single);

        let mut properties = overlay.clone();
        properties.extend(parsed.properties.clone());

        check_cardinality(mode, parsed.hosts.len())?;
        if matches!(mode, HaMode::Failover | HaMode::LoadBalance) {
            properties.insert(LOCAL_SESSION_STATE.into(), "true".into());
        }
        let interceptors = interceptors(mode, &properties)?;

        let user = parsed
            .user
            .clone()
            .or_else(|| properties.get("user").cloned())
            .unwrap_or_else(whoami::username);
        let password = parsed
            .password
            .clone()
            .or_else(|| properties.get("password").cloned());

        let mut hosts = parsed
            .hosts
            .iter()
            .map(|spec| endpoint(spec, &user, password.as_deref(), &properties))
            .collect::<Result<Vec<_>>>()?;

        let allow_duplicates = match properties.get(ALLOW_DUPLICATE_HOSTS) {
            Some(value) => parse_bool(ALLOW_DUPLICATE_HOSTS, value)?,
            None => true,
        };
        if !allow_duplicates {
            check_duplicates(&hosts)?;
        }

        match mode {
            HaMode::Replication => classify_replication(&mut hosts)?,
            HaMode::Priority => rank_by_priority(&mut hosts)?,
            _ => {}
        }

        Ok(Self {
            raw: raw.to_string(),
            mode,
            hosts,
            database: parsed.database,
            user,
            password,
            properties,
            interceptors,
        })
    }

    /// Descriptor string as given
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Topology mode
    pub fn mode(&self) -> HaMode {
        self.mode
    }

    /// Hosts in connection order
    pub fn hosts(&self) -> &[HostEndpoint] {
        &self.hosts
    }

    /// Database path segment
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Default user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Default password
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Merged global properties
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Interceptors derived from the properties
    pub fn interceptors(&self) -> &[Interceptor] {
        &self.interceptors
    }

    /// Master hosts of a replication topology
    pub fn masters(&self) -> impl Iterator<Item = &HostEndpoint> {
        self.hosts.iter().filter(|h| h.role == HostRole::Master)
    }

    /// Replica hosts of a replication topology
    pub fn replicas(&self) -> impl Iterator<Item = &HostEndpoint> {
        self.hosts.iter().filter(|h| h.role == HostRole::Replica)
    }

    /// Endpoint for `host:port`, created on demand if it is not listed
    ///
    /// A listed host is returned as is; otherwise the new endpoint shares the
    /// descriptor's default credentials and global properties.
    pub fn spawn_endpoint(&self, host: &str, port: u16) -> HostEndpoint {
        if let Some(existing) = self.hosts.iter().find(|h| h.host == host && h.port == port) {
            return existing.clone();
        }
        HostEndpoint {
            host: host.to_string(),
            port,
            user: self.user.clone(),
            password: self.password.clone(),
            properties: self.properties.clone(),
            role: HostRole::Undefined,
        }
    }

    /// Session configuration for `endpoint` with this descriptor's database
    pub fn config_for(&self, endpoint: &HostEndpoint) -> Result<ConnectionConfig> {
        endpoint.config(self.database())
    }
}

fn check_cardinality(mode: HaMode, count: usize) -> Result<()> {
    let ok = match mode {
        HaMode::Single => count == 1,
        HaMode::Failover => count > 1,
        HaMode::LoadBalance | HaMode::Replication | HaMode::Priority => count >= 1,
    };
    if ok {
        return Ok(());
    }
    let expected = match mode {
        HaMode::Single => "exactly one host",
        HaMode::Failover => "more than one host",
        _ => "at least one host",
    };
    Err(Error::Config(format!(
        "{} topology requires {}, got {}",
        mode.as_str(),
        expected,
        count
    )))
}

fn interceptors(mode: HaMode, properties: &BTreeMap<String, String>) -> Result<Vec<Interceptor>> {
    if mode != HaMode::LoadBalance {
        return Ok(Vec::new());
    }
    let Some(value) = properties.get(AUTO_COMMIT_SWAP_THRESHOLD) else {
        return Ok(Vec::new());
    };
    let threshold: u32 = value.parse().map_err(|_| {
        Error::Config(format!(
            "invalid {} '{}'",
            AUTO_COMMIT_SWAP_THRESHOLD, value
        ))
    })?;
    Ok(if threshold > 0 {
        vec![Interceptor::AutoCommitSwap { threshold }]
    } else {
        Vec::new()
    })
}

fn endpoint(
    spec: &HostSpec,
    user: &str,
    password: Option<&str>,
    global: &BTreeMap<String, String>,
) -> Result<HostEndpoint> {
    let mut properties = global.clone();
    properties.extend(spec.properties.clone());

    let role = match spec.role.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => HostRole::Undefined,
        Some("master") | Some("primary") => HostRole::Master,
        Some("replica") | Some("slave") => HostRole::Replica,
        Some(other) => {
            return Err(Error::Config(format!(
                "unknown host type '{}' for {}",
                other, spec.host
            )))
        }
    };
    let role = match &spec.priority {
        None => role,
        Some(value) => match value.parse::<u8>() {
            Ok(p) if p <= MAX_PRIORITY => HostRole::Priority(p),
            _ => {
                return Err(Error::Config(format!(
                    "priority '{}' for {} outside 0..={}",
                    value, spec.host, MAX_PRIORITY
                )))
            }
        },
    };

    Ok(HostEndpoint {
        host: spec.host.clone(),
        port: spec.port.unwrap_or(DEFAULT_PORT),
        user: spec.user.clone().unwrap_or_else(|| user.to_string()),
        password: spec.password.clone().or_else(|| password.map(str::to_string)),
        properties,
        role,
    })
}

fn check_duplicates(hosts: &[HostEndpoint]) -> Result<()> {
    let mut seen = HashSet::new();
    for host in hosts {
        if !seen.insert((host.host.as_str(), host.port)) {
            return Err(Error::Config(format!(
                "duplicate host {} ({}=false)",
                host.address(),
                ALLOW_DUPLICATE_HOSTS
            )));
        }
    }
    Ok(())
}

/// Untagged hosts become replicas when a master is tagged; otherwise the
/// first untagged host is the master
fn classify_replication(hosts: &mut [HostEndpoint]) -> Result<()> {
    let mut has_master = hosts.iter().any(|h| h.role == HostRole::Master);
    for host in hosts.iter_mut() {
        match host.role {
            HostRole::Undefined if !has_master => {
                host.role = HostRole::Master;
                has_master = true;
            }
            HostRole::Undefined => host.role = HostRole::Replica,
            HostRole::Priority(_) => {
                return Err(Error::Config(format!(
                    "priority is not valid in a replication topology ({})",
                    host.address()
                )))
            }
            HostRole::Master | HostRole::Replica => {}
        }
    }
    if !has_master {
        return Err(Error::Config(
            "replication topology has no master host".into(),
        ));
    }
    Ok(())
}

/// Same credentials everywhere; priorities on all hosts or none; sorted
/// descending, ties keeping descriptor order
fn rank_by_priority(hosts: &mut [HostEndpoint]) -> Result<()> {
    if let Some(first) = hosts.first() {
        if let Some(other) = hosts
            .iter()
            .find(|h| h.user != first.user || h.password != first.password)
        {
            return Err(Error::Config(format!(
                "priority topology requires identical credentials ({} differs from {})",
                other.address(),
                first.address()
            )));
        }
    }

    let ranked = hosts
        .iter()
        .filter(|h| matches!(h.role, HostRole::Priority(_)))
        .count();
    if ranked != 0 && ranked != hosts.len() {
        return Err(Error::Config(
            "priority topology requires a priority on every host or on none".into(),
        ));
    }
    hosts.sort_by_key(|h| match h.role {
        HostRole::Priority(p) => std::cmp::Reverse(p),
        _ => std::cmp::Reverse(0),
    });
    Ok(())
}

type CacheKey = (String, BTreeMap<String, String>);

/// Resolved descriptors keyed by descriptor string and property overlay
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: RwLock<HashMap<CacheKey, Arc<ConnectionDescriptor>>>,
}

static GLOBAL_CACHE: Lazy<DescriptorCache> = Lazy::new(DescriptorCache::new);

impl DescriptorCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache
    pub fn global() -> &'static DescriptorCache {
        &GLOBAL_CACHE
    }

    /// Resolve through the cache
    ///
    /// Readers share the lock; on a miss the writer re-checks before parsing,
    /// since another caller may have filled the entry meanwhile. Failed
    /// resolutions are not cached.
    pub fn resolve(
        &self,
        raw: &str,
        overlay: &BTreeMap<String, String>,
    ) -> Result<Arc<ConnectionDescriptor>> {
        let key = (raw.to_string(), overlay.clone());
        if let Some(found) = self.entries.read().get(&key) {
            crate::metrics::counters::descriptor_cache(true);
            return Ok(Arc::clone(found));
        }

        let mut entries = self.entries.write();
        if let Some(found) = entries.get(&key) {
            crate::metrics::counters::descriptor_cache(true);
            return Ok(Arc::clone(found));
        }
        crate::metrics::counters::descriptor_cache(false);
        let resolved = Arc::new(ConnectionDescriptor::resolve(raw, overlay)?);
        tracing::debug!(
            mode = resolved.mode().as_str(),
            hosts = resolved.hosts().len(),
            "connection descriptor resolved"
        );
        entries.insert(key, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Number of cached descriptors
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Nothing cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
