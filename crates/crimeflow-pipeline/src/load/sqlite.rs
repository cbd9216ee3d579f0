use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use crimeflow_frame::Value;
use crimeflow_types::{PipelineError, Result};

use super::schema::{self, quote, ColumnDef, ColumnType, TableSchema};
use super::Loader;

/// Rows per INSERT statement, kept well below SQLite's bound-parameter limit.
const INSERT_CHUNK_ROWS: usize = 500;

/// A single typed cell ready to bind.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

fn coerce(value: &Value, column: &ColumnDef) -> std::result::Result<SqlValue, String> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    match column.ty {
        ColumnType::Text => Ok(SqlValue::Text(value.to_field())),
        // Whitespace-only numeric fields carry no value.
        _ if value.is_blank() => Ok(SqlValue::Null),
        ColumnType::Integer => value
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| format!("column '{}': '{value}' is not an integer", column.name)),
        ColumnType::Real => value
            .as_f64()
            .map(SqlValue::Real)
            .ok_or_else(|| format!("column '{}': '{value}' is not a number", column.name)),
    }
}

/// Loads datasets into a SQLite database through a single-connection pool (SQLite has one
/// writer at a time, so concurrent load tasks queue on the pool).
#[derive(Clone)]
pub struct SqliteLoader {
    pool: SqlitePool,
}

impl SqliteLoader {
    /// Open (creating if needed) the database at `url`, e.g. `sqlite://crimeflow.db` or
    /// `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = pool_options()
            .connect_with(connect_options(url)?)
            .await
            .map_err(|e| load_error("*", format!("cannot open {url}: {e}")))?;
        tracing::debug!(url, "SQLite sink connected");
        Ok(Self { pool })
    }

    /// Like [`SqliteLoader::connect`], but the database is only opened when first used.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = pool_options().connect_lazy_with(connect_options(url)?);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| load_error(table, e))?;
        Ok(n > 0)
    }

    pub async fn row_count(&self, table: &str) -> Result<i64> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote(table)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| load_error(table, e))
    }

    async fn scalar(&self, table: &str, sql: &str) -> Result<i64> {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| load_error(table, e))
    }

    async fn execute(&self, table: &str, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| load_error(table, e))?;
        Ok(())
    }

    async fn insert_all(
        &self,
        schema: &TableSchema,
        defs: &[&ColumnDef],
        rows: &[Vec<SqlValue>],
    ) -> std::result::Result<(), sqlx::Error> {
        let column_list: Vec<String> = defs.iter().map(|d| quote(d.name)).collect();
        let prefix = format!(
            "INSERT INTO {} ({}) ",
            quote(schema.name),
            column_list.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&schema.create_sql()).execute(&mut *tx).await?;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(&prefix);
            qb.push_values(chunk, |mut b, row| {
                for value in row {
                    match value {
                        SqlValue::Null => b.push_bind(None::<i64>),
                        SqlValue::Integer(i) => b.push_bind(*i),
                        SqlValue::Real(f) => b.push_bind(*f),
                        SqlValue::Text(s) => b.push_bind(s.clone()),
                    };
                }
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await
    }
}

fn connect_options(url: &str) -> Result<SqliteConnectOptions> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| load_error("*", format!("invalid database url {url}: {e}")))?;
    Ok(options.create_if_missing(true))
}

fn pool_options() -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(600))
}

fn load_error(table: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::LoadError {
        table: table.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl Loader for SqliteLoader {
    async fn load(&self, table: &str, columns: &[String], rows: Vec<Vec<Value>>) -> Result<u64> {
        let schema = schema::table(table)?;
        // Dropped before anything can fail, and outside the insert transaction: a failed load
        // leaves no table behind.
        self.execute(table, &format!("DROP TABLE IF EXISTS {}", quote(table)))
            .await?;
        let defs = schema.match_columns(columns)?;

        let mut typed = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let cells = row
                .iter()
                .zip(&defs)
                .map(|(v, def)| coerce(v, def))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|msg| load_error(table, format!("row {}: {msg}", i + 1)))?;
            typed.push(cells);
        }

        self.insert_all(schema, &defs, &typed)
            .await
            .map_err(|e| load_error(table, e))?;

        tracing::info!(table, rows = typed.len(), "Table loaded");
        Ok(typed.len() as u64)
    }

    async fn apply_constraints(&self, table: &str) -> Result<()> {
        let schema = schema::table(table)?;
        if !self.table_exists(table).await? {
            return Err(load_error(table, "table has not been loaded"));
        }
        let t = quote(table);
        let pk = quote(schema.primary_key);

        let duplicates = self
            .scalar(
                table,
                &format!("SELECT COUNT({pk}) - COUNT(DISTINCT {pk}) FROM {t}"),
            )
            .await?;
        if duplicates > 0 {
            return Err(load_error(
                table,
                format!(
                    "primary key '{}' has {duplicates} duplicate value(s)",
                    schema.primary_key
                ),
            ));
        }
        self.execute(
            table,
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {t} ({pk})",
                quote(&format!("pk_{table}"))
            ),
        )
        .await?;

        for fk in schema.foreign_keys {
            if !self.table_exists(fk.references).await? {
                return Err(load_error(
                    table,
                    format!("referenced table '{}' has not been loaded", fk.references),
                ));
            }
            let column = quote(fk.column);
            let orphans = self
                .scalar(
                    table,
                    &format!(
                        "SELECT COUNT(*) FROM {t} AS c WHERE c.{column} IS NOT NULL \
                         AND NOT EXISTS (SELECT 1 FROM {} AS p WHERE p.{} = c.{column})",
                        quote(fk.references),
                        quote(fk.referenced_column)
                    ),
                )
                .await?;
            if orphans > 0 {
                return Err(load_error(
                    table,
                    format!(
                        "{orphans} row(s) reference a missing {}.{} through '{}'",
                        fk.references, fk.referenced_column, fk.column
                    ),
                ));
            }
            self.execute(
                table,
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {t} ({column})",
                    quote(&format!("fk_{table}_{}", fk.column.to_lowercase()))
                ),
            )
            .await?;
        }
        tracing::info!(
            table,
            primary_key = schema.primary_key,
            foreign_keys = schema.foreign_keys.len(),
            "Constraints applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    fn t(s: &str) -> Value {
        Value::text(s)
    }

    async fn memory() -> SqliteLoader {
        SqliteLoader::connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn coercion_follows_column_type() {
        let int = ColumnDef {
            name: "HOUR",
            ty: ColumnType::Integer,
        };
        let real = ColumnDef {
            name: "Lat",
            ty: ColumnType::Real,
        };
        assert_eq!(coerce(&t("13"), &int).unwrap(), SqlValue::Integer(13));
        assert_eq!(coerce(&t("13.0"), &int).unwrap(), SqlValue::Integer(13));
        assert_eq!(coerce(&Value::Int(1), &int).unwrap(), SqlValue::Integer(1));
        assert_eq!(coerce(&t(" "), &int).unwrap(), SqlValue::Null);
        assert_eq!(coerce(&t("42.357"), &real).unwrap(), SqlValue::Real(42.357));
        assert!(coerce(&t("B2"), &int).unwrap_err().contains("not an integer"));
        assert!(coerce(&t("north"), &real).is_err());
    }

    #[tokio::test]
    async fn load_creates_and_fills_the_table() {
        let loader = memory().await;
        let n = loader
            .load(
                "district",
                &cols(&["DISTRICT_KEY", "DISTRICT"]),
                vec![vec![t("3"), t("B2")], vec![Value::Int(1), Value::Null]],
            )
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(loader.row_count("district").await.unwrap(), 2);

        let rows: Vec<(i64, Option<String>)> =
            sqlx::query_as("SELECT district_key, district FROM district ORDER BY district_key")
                .fetch_all(loader.pool())
                .await
                .unwrap();
        assert_eq!(rows, vec![(1, None), (3, Some("B2".into()))]);
    }

    #[tokio::test]
    async fn reload_replaces_previous_contents() {
        let loader = memory().await;
        let header = cols(&["offense_code", "offense_code_group"]);
        loader
            .load("offense", &header, vec![vec![t("619"), t("Larceny")]; 3])
            .await
            .unwrap();
        loader
            .load("offense", &header, vec![vec![t("3115"), t("Investigate Person")]])
            .await
            .unwrap();
        assert_eq!(loader.row_count("offense").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_load_leaves_no_table() {
        let loader = memory().await;
        let header = cols(&["OFFENSE_CODE", "OFFENSE_CODE_GROUP"]);
        loader
            .load("offense", &header, vec![vec![t("619"), t("Larceny")]])
            .await
            .unwrap();

        let err = loader
            .load(
                "offense",
                &header,
                vec![vec![t("1402"), t("Vandalism")], vec![t("n/a"), t("Other")]],
            )
            .await
            .unwrap_err();
        match err {
            PipelineError::LoadError { table, message } => {
                assert_eq!(table, "offense");
                assert!(message.contains("row 2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!loader.table_exists("offense").await.unwrap());
    }

    #[tokio::test]
    async fn column_set_must_match() {
        let loader = memory().await;
        let err = loader
            .load("district", &cols(&["DISTRICT_KEY"]), vec![vec![t("1")]])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LoadError { .. }));
        assert!(!loader.table_exists("district").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_primary_key_is_rejected() {
        let loader = memory().await;
        loader
            .load(
                "district",
                &cols(&["district_key", "district"]),
                vec![vec![t("2"), t("B2")], vec![t("2"), t("C11")]],
            )
            .await
            .unwrap();
        let err = loader.apply_constraints("district").await.unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    async fn load_fact(loader: &SqliteLoader, offense_code: &str) {
        let header = cols(&[
            "OCCURRED_ON_DATE",
            "AVG_Temp",
            "MIN_Temp",
            "MAX_Temp",
            "Precipitation",
            "wspd",
            "pres",
            "INCIDENT_NUMBER",
            "OFFENSE_CODE",
            "OFFENSE_DESCRIPTION",
            "REPORTING_AREA",
            "SHOOTING",
            "HOUR",
            "UCR_PART",
            "STREET",
            "DISTRICT_KEY",
            "Crime_ID",
        ]);
        let row = vec![
            t("2018-09-02"),
            t("22.1"),
            t("18.3"),
            t("26.7"),
            t("0.0"),
            t("11.2"),
            t("1015.2"),
            t("I182070945"),
            t(offense_code),
            t("ASSAULT"),
            t("808"),
            t("1"),
            t("13"),
            t("Part One"),
            t("LINCOLN ST"),
            t("3"),
            Value::Int(1),
        ];
        loader.load("crimes_weather", &header, vec![row]).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_are_verified_and_indexed() {
        let loader = memory().await;
        loader
            .load(
                "offense",
                &cols(&["OFFENSE_CODE", "OFFENSE_CODE_GROUP"]),
                vec![vec![t("413"), t("Aggravated Assault")]],
            )
            .await
            .unwrap();
        loader
            .load(
                "district",
                &cols(&["DISTRICT_KEY", "DISTRICT"]),
                vec![vec![t("3"), t("B2")]],
            )
            .await
            .unwrap();
        load_fact(&loader, "413").await;
        loader.apply_constraints("crimes_weather").await.unwrap();

        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'crimes_weather' \
             ORDER BY name",
        )
        .fetch_all(loader.pool())
        .await
        .unwrap();
        assert_eq!(
            indexes,
            vec![
                "fk_crimes_weather_district_key",
                "fk_crimes_weather_offense_code",
                "pk_crimes_weather",
            ]
        );

        load_fact(&loader, "999").await;
        let err = loader.apply_constraints("crimes_weather").await.unwrap_err();
        assert!(err.to_string().contains("offense.offense_code"));
    }

    #[tokio::test]
    async fn constraints_need_the_table() {
        let loader = memory().await;
        let err = loader.apply_constraints("location").await.unwrap_err();
        assert!(err.to_string().contains("not been loaded"));
    }
}
