//! # Unit of Work
//!
//! One durable-store transaction per match attempt. The scope is explicit:
//! `begin` opens a REPEATABLE READ transaction, writes stage through it,
//! and only `commit` makes them visible. Dropping the unit of work without
//! committing rolls the transaction back (sqlx drop semantics), which is
//! exactly the contract the process-request state machine relies on.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::MatchingError;
use crate::models::{ChatMessage, Match, MatchStatus};

use super::matches;

/// A single transactional attempt against the durable store.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Stage a match session (criteria + user rows + session row).
    async fn add_match(&mut self, m: &Match) -> Result<(), MatchingError>;

    /// Stage a status change on an existing session.
    async fn update_match_status(
        &mut self,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<u64, MatchingError>;

    /// Stage a room message.
    async fn add_message(&mut self, message: &ChatMessage) -> Result<(), MatchingError>;

    /// Flush and commit. Consumes the unit of work; anything not committed
    /// by the time it drops is rolled back.
    async fn commit(self: Box<Self>) -> Result<(), MatchingError>;
}

#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, MatchingError>;
}

pub struct SqlxUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for SqlxUnitOfWork {
    async fn add_match(&mut self, m: &Match) -> Result<(), MatchingError> {
        matches::insert_match(&mut self.tx, m).await
    }

    async fn update_match_status(
        &mut self,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<u64, MatchingError> {
        matches::update_match_status(&mut self.tx, match_id, status).await
    }

    async fn add_message(&mut self, message: &ChatMessage) -> Result<(), MatchingError> {
        matches::insert_message(&mut self.tx, message).await
    }

    async fn commit(self: Box<Self>) -> Result<(), MatchingError> {
        self.tx.commit().await?;
        Ok(())
    }
}

pub struct SqlxUnitOfWorkFactory {
    pool: PgPool,
}

impl SqlxUnitOfWorkFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWorkFactory for SqlxUnitOfWorkFactory {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, MatchingError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        debug!("Unit of work opened");
        Ok(Box::new(SqlxUnitOfWork { tx }))
    }
}
