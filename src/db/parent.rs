use super::prelude::*;

/// A directed, typed edge between two object identities in the
/// `parent` table.
///
/// Inverse keys put the referenced object on the parent side (a
/// maintainer pointing at every block it maintains); local keys put
/// the owning object there (a block pointing at its notify address).
/// The whole 4-tuple is the primary key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParentRecord {
    pub parent: String,
    pub parent_type: String,
    pub child: String,
    pub child_type: String,
}

#[async_trait]
impl DbEntity for ParentRecord {
    const TABLE: &'static str = "parent";

    async fn create_table(pool: &PgPool) -> Result<(), WhoisDbError> {
        let mut tx = pool.begin().await?;

        debug!("Ensuring DB parent table exists");
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS
            parent (
                parent TEXT NOT NULL,
                parent_type TEXT NOT NULL,
                child TEXT NOT NULL,
                child_type TEXT NOT NULL,
                PRIMARY KEY (parent, parent_type, child, child_type)
            )"#,
        )
        .execute(&mut *tx)
        .await?;

        debug!("Ensuring DB parent indexes exist");
        for column in ["parent", "parent_type", "child", "child_type"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS ind_parent_{column} ON parent ({column})"
            ))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_with_txn(&self, txn: &mut PgConnection) -> Result<(), WhoisDbError> {
        sqlx::query(
            "INSERT INTO parent (parent, parent_type, child, child_type)
            VALUES ($1, $2, $3, $4)",
        )
        .bind(&self.parent)
        .bind(&self.parent_type)
        .bind(&self.child)
        .bind(&self.child_type)
        .execute(&mut *txn)
        .await?;
        Ok(())
    }
}

impl ParentRecord {
    /// Look the edge up by its full 4-tuple key.
    pub async fn get_by_key(
        txn: &mut PgConnection,
        parent: &str,
        parent_type: &str,
        child: &str,
        child_type: &str,
    ) -> Result<Option<ParentRecord>, WhoisDbError> {
        let row = sqlx::query(
            "SELECT parent, parent_type, child, child_type
            FROM parent
            WHERE parent = $1 AND parent_type = $2 AND child = $3 AND child_type = $4
            LIMIT 1",
        )
        .bind(parent)
        .bind(parent_type)
        .bind(child)
        .bind(child_type)
        .fetch_optional(&mut *txn)
        .await?;
        Ok(row.map(ParentRecord::from))
    }
}

impl From<PgRow> for ParentRecord {
    fn from(input: PgRow) -> Self {
        ParentRecord {
            parent: input.get("parent"),
            parent_type: input.get("parent_type"),
            child: input.get("child"),
            child_type: input.get("child_type"),
        }
    }
}
