use super::prelude::*;

/// A row of the `attr` table: aut-num, as-set, route-set and domain
/// objects.
///
/// Dormant like [`super::MemberRecord`]: the table exists so the query
/// side can rely on the schema, but nothing writes to it yet.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttrRecord {
    pub name: String,
    /// Which object kind this row came from.
    pub attr: String,
    pub description: Option<String>,
    pub remarks: Option<String>,
}

#[async_trait]
impl DbEntity for AttrRecord {
    const TABLE: &'static str = "attr";

    async fn create_table(pool: &PgPool) -> Result<(), WhoisDbError> {
        let mut tx = pool.begin().await?;

        debug!("Ensuring DB attr table exists");
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS
            attr (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                attr TEXT NOT NULL,
                description TEXT,
                remarks TEXT
            )"#,
        )
        .execute(&mut *tx)
        .await?;

        for column in ["name", "attr", "remarks"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS ind_attr_{column} ON attr ({column})"
            ))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ind_attr_description
            ON attr USING GIN (to_tsvector('english', description))",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_with_txn(&self, txn: &mut PgConnection) -> Result<(), WhoisDbError> {
        sqlx::query(
            "INSERT INTO attr (name, attr, description, remarks)
            VALUES ($1, $2, $3, $4)",
        )
        .bind(&self.name)
        .bind(&self.attr)
        .bind(&self.description)
        .bind(&self.remarks)
        .execute(&mut *txn)
        .await?;
        Ok(())
    }
}

impl AttrRecord {
    pub async fn get_by_name(
        txn: &mut PgConnection,
        name: &str,
    ) -> Result<Option<AttrRecord>, WhoisDbError> {
        let row =
            sqlx::query("SELECT name, attr, description, remarks FROM attr WHERE name = $1 LIMIT 1")
                .bind(name)
                .fetch_optional(&mut *txn)
                .await?;
        Ok(row.map(AttrRecord::from))
    }
}

impl From<PgRow> for AttrRecord {
    fn from(input: PgRow) -> Self {
        AttrRecord {
            name: input.get("name"),
            attr: input.get("attr"),
            description: input.get("description"),
            remarks: input.get("remarks"),
        }
    }
}
