use super::prelude::*;

/// One row of the `cidr` table: a network block or announced route,
/// keyed by `(inetnum, autnum)`.
///
/// `inetnum` is stored in the native `cidr` column type so the
/// longest-prefix containment operator (`inetnum >> '1.2.3.4'`) keeps
/// index support downstream; values bind as text and cast on the way
/// in. `autnum` is the empty string for blocks without an `origin:`,
/// since it is part of the primary key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CidrRecord {
    pub inetnum: String,
    pub autnum: String,
    /// `"inetnum"` for named blocks, `"route"` for announcements
    /// without a `netname:`.
    pub attr: String,
    pub netname: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub remarks: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub created: Option<String>,
    pub last_modified: Option<String>,
}

#[async_trait]
impl DbEntity for CidrRecord {
    const TABLE: &'static str = "cidr";

    async fn create_table(pool: &PgPool) -> Result<(), WhoisDbError> {
        let mut tx = pool.begin().await?;

        debug!("Ensuring DB cidr table exists");
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS
            cidr (
                inetnum CIDR NOT NULL,
                autnum TEXT NOT NULL DEFAULT '',
                attr TEXT NOT NULL,
                netname TEXT,
                country TEXT,
                description TEXT,
                remarks TEXT,
                status TEXT,
                source TEXT,
                created TEXT,
                last_modified TEXT,
                PRIMARY KEY (inetnum, autnum)
            )"#,
        )
        .execute(&mut *tx)
        .await?;

        debug!("Ensuring DB cidr indexes exist");
        // The containment operator the longest-prefix query uses needs
        // a GiST index; the primary key only covers equality.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ind_cidr_inetnum_gist
            ON cidr USING GIST (inetnum inet_ops)",
        )
        .execute(&mut *tx)
        .await?;
        for column in [
            "autnum",
            "attr",
            "netname",
            "country",
            "status",
            "source",
            "created",
            "last_modified",
        ] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS ind_cidr_{column} ON cidr ({column})"
            ))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ind_cidr_description
            ON cidr USING GIN (to_tsvector('english', description))",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_with_txn(&self, txn: &mut PgConnection) -> Result<(), WhoisDbError> {
        sqlx::query(
            "INSERT INTO cidr
            (inetnum, autnum, attr, netname, country, description, remarks, status, source, created, last_modified)
            VALUES ($1::cidr, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&self.inetnum)
        .bind(&self.autnum)
        .bind(&self.attr)
        .bind(&self.netname)
        .bind(&self.country)
        .bind(&self.description)
        .bind(&self.remarks)
        .bind(&self.status)
        .bind(&self.source)
        .bind(&self.created)
        .bind(&self.last_modified)
        .execute(&mut *txn)
        .await?;
        Ok(())
    }
}

impl CidrRecord {
    /// Look the row up by its `(inetnum, autnum)` key.
    pub async fn get_by_key(
        txn: &mut PgConnection,
        inetnum: &str,
        autnum: &str,
    ) -> Result<Option<CidrRecord>, WhoisDbError> {
        let row = sqlx::query(
            "SELECT inetnum::text AS inetnum, autnum, attr, netname, country, description,
                remarks, status, source, created, last_modified
            FROM cidr
            WHERE inetnum = $1::cidr AND autnum = $2
            LIMIT 1",
        )
        .bind(inetnum)
        .bind(autnum)
        .fetch_optional(&mut *txn)
        .await?;
        Ok(row.map(CidrRecord::from))
    }
}

impl From<PgRow> for CidrRecord {
    fn from(input: PgRow) -> Self {
        CidrRecord {
            inetnum: input.get("inetnum"),
            autnum: input.get("autnum"),
            attr: input.get("attr"),
            netname: input.get("netname"),
            country: input.get("country"),
            description: input.get("description"),
            remarks: input.get("remarks"),
            status: input.get("status"),
            source: input.get("source"),
            created: input.get("created"),
            last_modified: input.get("last_modified"),
        }
    }
}
