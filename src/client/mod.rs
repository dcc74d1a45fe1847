//! Connection topology
//!
//! This module handles:
//! * Descriptor parsing (`mariadb:[mode:]//hosts/db?props`)
//! * Topology rules, replication roles and priority ranking
//! * The descriptor cache and the endpoint walk that opens sessions

mod connection_string;
mod connector;
mod topology;

pub use connection_string::{HaMode, HostSpec, ParsedDescriptor};
pub use connector::Connector;
pub use topology::{
    ConnectionDescriptor, DescriptorCache, HostEndpoint, HostRole, Interceptor, MAX_PRIORITY,
};
