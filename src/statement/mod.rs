//! Statement parameter binding
//!
//! Both binding modes share the [`ParameterSet`] slot model:
//! * [`ClientPreparedStatement`] renders values as SQL literals into a text query
//! * [`PreparedStatement`] prepares on the server and sends binary parameters,
//!   uploading streams as long data and batching through MariaDB bulk execution
//!
//! [`Statement`] picks one of the two from the session's `useServerPrepStmts`.

pub mod batch;
mod bind;
mod client_side;
pub mod long_data;
mod server_side;

pub use batch::BatchResult;
pub use bind::{BindValue, ParameterSet, UNSIGNED_FLAG};
pub use client_side::{scan_placeholders, write_literal, ClientPreparedStatement};
pub use server_side::PreparedStatement;

use crate::connection::{QueryResult, ResultSink, Session};
use crate::Result;

/// A statement in whichever binding mode the session is configured for
#[derive(Debug)]
pub enum Statement {
    /// Parameters substituted into a text query
    Client(ClientPreparedStatement),
    /// Prepared on the server
    Server(PreparedStatement),
}

impl Statement {
    /// Prepare on the server when `useServerPrepStmts` is set, otherwise
    /// scan the template locally
    pub async fn prepare(session: &mut Session, sql: &str) -> Result<Self> {
        if session.config().use_server_prep_stmts {
            Ok(Self::Server(PreparedStatement::prepare(session, sql).await?))
        } else {
            Ok(Self::Client(ClientPreparedStatement::for_session(session, sql)))
        }
    }

    /// Number of `?` placeholders
    pub fn param_count(&self) -> usize {
        match self {
            Self::Client(s) => s.param_count(),
            Self::Server(s) => s.param_count(),
        }
    }

    /// Empty parameter set sized for this statement
    pub fn parameters(&self) -> ParameterSet {
        ParameterSet::new(self.param_count())
    }

    /// Execute once and collect every result
    pub async fn execute(
        &mut self,
        session: &mut Session,
        params: &mut ParameterSet,
    ) -> Result<QueryResult> {
        match self {
            Self::Client(s) => s.execute(session, params).await,
            Self::Server(s) => s.execute(session, params).await,
        }
    }

    /// Execute once, delivering results to `sink`
    pub async fn execute_with(
        &mut self,
        session: &mut Session,
        params: &mut ParameterSet,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        match self {
            Self::Client(s) => s.execute_with(session, params, sink).await,
            Self::Server(s) => s.execute_with(session, params, sink).await,
        }
    }

    /// Execute once per parameter set
    pub async fn execute_batch(
        &mut self,
        session: &mut Session,
        batch: &mut [ParameterSet],
    ) -> Result<BatchResult> {
        match self {
            Self::Client(s) => s.execute_batch(session, batch).await,
            Self::Server(s) => s.execute_batch(session, batch).await,
        }
    }

    /// Release server resources; a no-op for client-side statements
    pub async fn close(self, session: &mut Session) -> Result<()> {
        match self {
            Self::Client(_) => Ok(()),
            Self::Server(s) => s.close(session).await,
        }
    }
}
