//! Metrics emitted through the `metrics` facade
//!
//! The crate never installs a recorder; applications choose an exporter.
//! Every function here is cheap when no recorder is installed.

/// Label values shared across metrics
pub mod labels {
    /// Default plugin label before the server names one
    pub const MECHANISM_UNKNOWN: &str = "unknown";

    /// Cancellation by configured timeout
    pub const CANCEL_TIMEOUT: &str = "timeout";

    /// Cancellation requested by the caller
    pub const CANCEL_USER: &str = "user";

    /// Cancellation strategy: kill query over an auxiliary session
    pub const STRATEGY_KILL: &str = "kill_query";

    /// Cancellation strategy: abort the owning session
    pub const STRATEGY_ABORT: &str = "abort";
}

/// Counters
pub mod counters {
    use metrics::counter;

    /// Authentication attempt with a plugin
    pub fn auth_attempted(plugin: &str) {
        counter!("mariadb_wire_auth_attempts_total", "plugin" => plugin.to_string()).increment(1);
    }

    /// Authentication succeeded
    pub fn auth_successful(plugin: &str) {
        counter!("mariadb_wire_auth_success_total", "plugin" => plugin.to_string()).increment(1);
    }

    /// Authentication failed
    pub fn auth_failed(plugin: &str, reason: &'static str) {
        counter!(
            "mariadb_wire_auth_failures_total",
            "plugin" => plugin.to_string(),
            "reason" => reason
        )
        .increment(1);
    }

    /// Server asked to switch authentication plugin
    pub fn auth_switched(to_plugin: &str) {
        counter!("mariadb_wire_auth_switch_total", "plugin" => to_plugin.to_string()).increment(1);
    }

    /// Command written to the wire
    pub fn command_sent(command: &'static str) {
        counter!("mariadb_wire_commands_total", "command" => command).increment(1);
    }

    /// Statement cancellation fired
    pub fn cancellation_fired(reason: &'static str, strategy: &'static str) {
        counter!(
            "mariadb_wire_cancellations_total",
            "reason" => reason,
            "strategy" => strategy
        )
        .increment(1);
    }

    /// Cancellation attempt failed and was captured
    pub fn cancellation_failed() {
        counter!("mariadb_wire_cancellation_failures_total").increment(1);
    }

    /// Descriptor cache lookup
    pub fn descriptor_cache(hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        counter!("mariadb_wire_descriptor_cache_total", "outcome" => outcome).increment(1);
    }

    /// Endpoint connection attempt in a topology walk
    pub fn endpoint_attempt(outcome: &'static str) {
        counter!("mariadb_wire_endpoint_attempts_total", "outcome" => outcome).increment(1);
    }
}

/// Histograms
pub mod histograms {
    use metrics::histogram;

    /// Authentication duration in milliseconds
    pub fn auth_duration(plugin: &str, duration_ms: u64) {
        histogram!("mariadb_wire_auth_duration_ms", "plugin" => plugin.to_string())
            .record(duration_ms as f64);
    }

    /// Rows delivered by one query
    pub fn rows_returned(rows: u64) {
        histogram!("mariadb_wire_rows_returned").record(rows as f64);
    }

    /// Rows per batch chunk
    pub fn batch_chunk_rows(rows: usize) {
        histogram!("mariadb_wire_batch_chunk_rows").record(rows as f64);
    }

    /// Bytes sent in one long-data chunk
    pub fn long_data_bytes(bytes: u64) {
        histogram!("mariadb_wire_long_data_bytes").record(bytes as f64);
    }
}
