//! PostgreSQL schema and row types.
//!
//! Two tables do the real work: `cidr` (one row per prefix/origin
//! pair) and `parent` (typed edges between object identities). The
//! `member` and `attr` tables are created alongside them as sinks for
//! maintainer/person/role/organisation/irt and aut-num/as-set/
//! route-set/domain objects; their row types share the same trait but
//! nothing feeds them yet.

use crate::config::RunConfig;
use crate::error::WhoisDbError;
use log::info;
use sqlx::postgres::PgPoolOptions;

pub mod attr;
pub mod cidr;
pub mod member;
pub mod parent;
pub(crate) mod prelude;
#[cfg(test)]
mod test;

pub use attr::AttrRecord;
pub use cidr::CidrRecord;
pub use member::MemberRecord;
pub use parent::ParentRecord;

use prelude::*;

/// A row type backed by one table.
#[async_trait]
pub trait DbEntity {
    const TABLE: &'static str;

    /// Ensure the table and its indexes exist. Must be idempotent.
    async fn create_table(pool: &PgPool) -> Result<(), WhoisDbError>;

    /// Insert the row inside the caller's transaction or savepoint.
    async fn save_with_txn(&self, txn: &mut PgConnection) -> Result<(), WhoisDbError>;

    /// Insert the row in its own short transaction.
    async fn save(&self, pool: &PgPool) -> Result<(), WhoisDbError> {
        let mut txn = pool.begin().await?;
        self.save_with_txn(&mut txn).await?;
        txn.commit().await?;
        Ok(())
    }
}

/// Open the connection pool, sized so every worker gets a session with
/// a little headroom for the orchestrator.
pub async fn setup_connection(config: &RunConfig) -> Result<PgPool, WhoisDbError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.num_workers as u32 + 2)
        .connect(&config.connection_string)
        .await?;
    Ok(pool)
}

/// Ensure every table exists.
pub async fn start_db(pool: &PgPool) -> Result<(), WhoisDbError> {
    CidrRecord::create_table(pool).await?;
    ParentRecord::create_table(pool).await?;
    MemberRecord::create_table(pool).await?;
    AttrRecord::create_table(pool).await?;
    info!("Database schema is ready");
    Ok(())
}

/// Drop every table, for `--reset_db` runs.
pub async fn drop_db(pool: &PgPool) -> Result<(), WhoisDbError> {
    for table in [
        CidrRecord::TABLE,
        ParentRecord::TABLE,
        MemberRecord::TABLE,
        AttrRecord::TABLE,
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(pool)
            .await?;
    }
    info!("Dropped all tables");
    Ok(())
}

/// Did this insert lose a check-then-insert race with a peer worker?
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
