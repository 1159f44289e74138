use super::prelude::*;

/// A row of the `member` table: mntner, person, role, organisation and
/// irt objects, keyed by their registry identifier.
///
/// The table ships with the schema but no ingestion path feeds it yet;
/// wiring a sink up means building these from blocks in the worker and
/// calling [`DbEntity::save_with_txn`] like the live tables do.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MemberRecord {
    /// Registry identifier, e.g. a mntner name or a person's nic-hdl.
    pub idd: String,
    /// Which object kind this row came from.
    pub attr: String,
    pub name: String,
    pub description: Option<String>,
    pub remarks: Option<String>,
}

#[async_trait]
impl DbEntity for MemberRecord {
    const TABLE: &'static str = "member";

    async fn create_table(pool: &PgPool) -> Result<(), WhoisDbError> {
        let mut tx = pool.begin().await?;

        debug!("Ensuring DB member table exists");
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS
            member (
                id BIGSERIAL PRIMARY KEY,
                idd TEXT NOT NULL UNIQUE,
                attr TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                remarks TEXT
            )"#,
        )
        .execute(&mut *tx)
        .await?;

        for column in ["attr", "name"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS ind_member_{column} ON member ({column})"
            ))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ind_member_description
            ON member USING GIN (to_tsvector('english', description))",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_with_txn(&self, txn: &mut PgConnection) -> Result<(), WhoisDbError> {
        sqlx::query(
            "INSERT INTO member (idd, attr, name, description, remarks)
            VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&self.idd)
        .bind(&self.attr)
        .bind(&self.name)
        .bind(&self.description)
        .bind(&self.remarks)
        .execute(&mut *txn)
        .await?;
        Ok(())
    }
}

impl MemberRecord {
    pub async fn get_by_idd(
        txn: &mut PgConnection,
        idd: &str,
    ) -> Result<Option<MemberRecord>, WhoisDbError> {
        let row = sqlx::query(
            "SELECT idd, attr, name, description, remarks FROM member WHERE idd = $1 LIMIT 1",
        )
        .bind(idd)
        .fetch_optional(&mut *txn)
        .await?;
        Ok(row.map(MemberRecord::from))
    }
}

impl From<PgRow> for MemberRecord {
    fn from(input: PgRow) -> Self {
        MemberRecord {
            idd: input.get("idd"),
            attr: input.get("attr"),
            name: input.get("name"),
            description: input.get("description"),
            remarks: input.get("remarks"),
        }
    }
}
