//! Connection descriptor parsing
//!
//! Supports formats:
//! * mariadb://[user[:password]@]host[:port][,host[:port]...][/database][?key=value&...]
//! * mariadb:failover://..., mariadb:loadbalance://..., mariadb:replication://...,
//!   mariadb:priority://... (`mysql:` is accepted in place of `mariadb:`)
//! * host entries as `[user[:password]@]address=(host=h)(port=p)(type=master)...`
//!
//! Every token is percent-decoded. This module only splits the descriptor;
//! topology rules are applied by [`ConnectionDescriptor`](super::ConnectionDescriptor).

use crate::{Error, Result};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;

/// High-availability mode selected by the scheme prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaMode {
    /// `mariadb://`: exactly one host
    Single,
    /// `mariadb:failover://`: more than one host, tried in order
    Failover,
    /// `mariadb:loadbalance://`: hosts tried in random order
    LoadBalance,
    /// `mariadb:replication://`: master and replica hosts
    Replication,
    /// `mariadb:priority://`: hosts ranked by priority
    Priority,
}

impl HaMode {
    fn from_prefix(prefix: &str) -> Result<Self> {
        match prefix {
            "" => Ok(Self::Single),
            "failover" => Ok(Self::Failover),
            "loadbalance" => Ok(Self::LoadBalance),
            "replication" => Ok(Self::Replication),
            "priority" => Ok(Self::Priority),
            other => Err(Error::Config(format!("unknown topology '{}'", other))),
        }
    }

    /// Scheme prefix as written in a descriptor
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Failover => "failover",
            Self::LoadBalance => "loadbalance",
            Self::Replication => "replication",
            Self::Priority => "priority",
        }
    }
}

/// One host entry before topology rules are applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    /// Host name or address (IPv6 without brackets)
    pub host: String,
    /// Explicit port
    pub port: Option<u16>,
    /// Per-host user from the userinfo prefix or `user=`
    pub user: Option<String>,
    /// Per-host password
    pub password: Option<String>,
    /// `type=` attribute (`master`, `replica`/`slave`)
    pub role: Option<String>,
    /// `priority=` attribute
    pub priority: Option<String>,
    /// Remaining `(k=v)` attributes
    pub properties: BTreeMap<String, String>,
}

/// A descriptor split into its parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDescriptor {
    /// Topology prefix; `None` for the single-host form
    pub mode: Option<HaMode>,
    /// Credentials from the userinfo prefix of a plain host list
    pub user: Option<String>,
    /// Password from the userinfo prefix
    pub password: Option<String>,
    /// Host entries in descriptor order
    pub hosts: Vec<HostSpec>,
    /// Database path segment
    pub database: Option<String>,
    /// Query properties
    pub properties: BTreeMap<String, String>,
}

impl ParsedDescriptor {
    /// Split a descriptor string
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("mariadb:")
            .or_else(|| s.strip_prefix("mysql:"))
            .ok_or_else(|| {
                Error::Config("connection descriptor must start with mariadb: or mysql:".into())
            })?;
        let (prefix, rest) = rest.split_once("//").ok_or_else(|| {
            Error::Config(format!("missing '//' in connection descriptor '{}'", s))
        })?;
        let mode = HaMode::from_prefix(&decode(prefix.trim_end_matches(':'))?)?;

        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (authority, database) = split_path(rest);
        let database = match database {
            Some(db) if !db.is_empty() => Some(decode(db)?),
            _ => None,
        };

        let mut parsed = Self {
            mode: (mode != HaMode::Single).then_some(mode),
            database,
            properties: parse_properties(query)?,
            ..Default::default()
        };

        for entry in split_hosts(authority) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (userinfo, address) = match entry.rfind('@') {
                Some(pos) if !entry[..pos].contains('(') => (Some(&entry[..pos]), &entry[pos + 1..]),
                _ => (None, entry),
            };
            let credentials = userinfo.map(parse_userinfo).transpose()?;

            let spec = if address.starts_with("address=") {
                let mut spec = parse_address_form(address)?;
                if let Some((user, password)) = credentials {
                    spec.user = spec.user.or(Some(user));
                    spec.password = spec.password.or(password);
                }
                spec
            } else {
                // userinfo on a plain host applies to the whole descriptor
                if let Some((user, password)) = credentials {
                    parsed.user = Some(user);
                    parsed.password = password;
                }
                parse_host_port(address)?
            };
            parsed.hosts.push(spec);
        }

        if parsed.hosts.is_empty() {
            return Err(Error::Config(format!(
                "no host in connection descriptor '{}'",
                s
            )));
        }
        Ok(parsed)
    }
}

fn decode(token: &str) -> Result<String> {
    percent_decode_str(token)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::Config(format!("invalid percent-encoding in '{}': {}", token, e)))
}

/// Split `authority/path`, ignoring slashes inside parentheses
fn split_path(s: &str) -> (&str, Option<&str>) {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '/' if depth <= 0 => return (&s[..i], Some(&s[i + 1..])),
            _ => {}
        }
    }
    (s, None)
}

/// Split the host list on commas outside parentheses
fn split_hosts(s: &str) -> Vec<&str> {
    let mut hosts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth <= 0 => {
                hosts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    hosts.push(&s[start..]);
    hosts
}

fn parse_userinfo(s: &str) -> Result<(String, Option<String>)> {
    match s.split_once(':') {
        Some((user, password)) => Ok((decode(user)?, Some(decode(password)?))),
        None => Ok((decode(s)?, None)),
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| Error::Config(format!("invalid port '{}'", s)))
}

/// `host`, `host:port`, `[v6]`, `[v6]:port`, or an unbracketed IPv6 address
fn parse_host_port(s: &str) -> Result<HostSpec> {
    let s = decode(s)?;
    let (host, port) = if let Some(inner) = s.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("unterminated IPv6 address '{}'", s)))?;
        let port = match after.strip_prefix(':') {
            Some(p) => Some(parse_port(p)?),
            None if after.is_empty() => None,
            None => return Err(Error::Config(format!("invalid host '{}'", s))),
        };
        (host.to_string(), port)
    } else if s.matches(':').count() > 1 {
        (s.clone(), None)
    } else if let Some((host, port)) = s.split_once(':') {
        (host.to_string(), Some(parse_port(port)?))
    } else {
        (s.clone(), None)
    };

    if host.is_empty() {
        return Err(Error::Config("empty host in connection descriptor".into()));
    }
    Ok(HostSpec {
        host,
        port,
        ..Default::default()
    })
}

/// `address=(k=v)(k=v)...`
fn parse_address_form(s: &str) -> Result<HostSpec> {
    let mut rest = &s["address=".len()..];
    let mut spec = HostSpec::default();
    while !rest.is_empty() {
        let body = rest
            .strip_prefix('(')
            .and_then(|r| r.find(')').map(|end| (&r[..end], &r[end + 1..])));
        let Some((pair, tail)) = body else {
            return Err(Error::Config(format!("malformed address entry '{}'", s)));
        };
        rest = tail.trim_start();
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key.trim())?;
        let value = decode(value.trim())?;
        match key.as_str() {
            "host" => spec.host = value.trim_start_matches('[').trim_end_matches(']').to_string(),
            "port" => spec.port = Some(parse_port(&value)?),
            "type" => spec.role = Some(value),
            "priority" => spec.priority = Some(value),
            "user" => spec.user = Some(value),
            "password" => spec.password = Some(value),
            _ => {
                spec.properties.insert(key, value);
            }
        }
    }
    if spec.host.is_empty() {
        return Err(Error::Config(format!("address entry without host '{}'", s)));
    }
    Ok(spec)
}

/// `key[=value]` pairs joined by `&`
fn parse_properties(query: &str) -> Result<BTreeMap<String, String>> {
    let mut properties = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        properties.insert(decode(key)?, decode(value)?);
    }
    Ok(properties)
}
