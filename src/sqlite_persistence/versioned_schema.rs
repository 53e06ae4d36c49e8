//! Versioned SQLite schema declarations.
//!
//! Each database declares its tables as statics and wraps them in a list of
//! `VersionedSchema`s. A brand new database is created at the latest version;
//! an existing one is validated against the declared shape and migrated
//! forward if needed. The schema version is stored in `PRAGMA user_version`,
//! offset by `BASE_DB_VERSION` so a plain un-versioned SQLite file (version 0)
//! is never mistaken for schema version 0.

use anyhow::{bail, Result};
use rusqlite::{params, Connection};

pub const BASE_DB_VERSION: usize = 77000;

/// Declare a column with optional field overrides, e.g.
/// `sqlite_column!("id", &SqlType::Text, is_primary_key = true)`.
#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = $crate::sqlite_persistence::Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub foreign_key: Option<&'static ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut sql = format!("CREATE TABLE {} (", self.name);
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column.name);
            sql.push(' ');
            sql.push_str(column.sql_type.as_sql());
            if column.is_primary_key {
                sql.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                sql.push_str(" NOT NULL");
            }
            if let Some(default_value) = column.default_value {
                sql.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some(fk) = column.foreign_key {
                sql.push_str(&format!(
                    " REFERENCES {}({}) ON DELETE CASCADE",
                    fk.foreign_table, fk.foreign_column
                ));
            }
        }
        sql.push_str(");");
        conn.execute(&sql, params![])?;

        for (index_name, index_columns) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, index_columns
                ),
                params![],
            )?;
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Validate that the live database matches the declared tables: same
    /// column names, types, null-ness, primary keys, and that every declared
    /// index and foreign key exists.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            struct LiveColumn {
                name: String,
                sql_type: String,
                non_null: bool,
                is_primary_key: bool,
            }

            let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table.name))?;
            let live: Vec<LiveColumn> = stmt
                .query_map(params![], |row| {
                    Ok(LiveColumn {
                        name: row.get(1)?,
                        sql_type: row.get(2)?,
                        non_null: row.get::<_, i32>(3)? == 1,
                        is_primary_key: row.get::<_, i32>(5)? == 1,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;

            if live.len() != table.columns.len() {
                bail!(
                    "table {} has {} columns, expected {} ({})",
                    table.name,
                    live.len(),
                    table.columns.len(),
                    table
                        .columns
                        .iter()
                        .map(|c| c.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            for (actual, expected) in live.iter().zip(table.columns.iter()) {
                if actual.name != expected.name {
                    bail!(
                        "table {}: expected column {}, found {}",
                        table.name,
                        expected.name,
                        actual.name
                    );
                }
                if actual.sql_type != expected.sql_type.as_sql() {
                    bail!(
                        "table {} column {}: expected type {}, found {}",
                        table.name,
                        expected.name,
                        expected.sql_type.as_sql(),
                        actual.sql_type
                    );
                }
                if actual.non_null != expected.non_null {
                    bail!(
                        "table {} column {}: NOT NULL mismatch",
                        table.name,
                        expected.name
                    );
                }
                if actual.is_primary_key != expected.is_primary_key {
                    bail!(
                        "table {} column {}: primary key mismatch",
                        table.name,
                        expected.name
                    );
                }
            }

            for (index_name, _) in table.indices {
                let exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                        params![index_name, table.name],
                        |_| Ok(true),
                    )
                    .unwrap_or(false);
                if !exists {
                    bail!("table {} is missing index '{}'", table.name, index_name);
                }
            }

            let mut fk_stmt =
                conn.prepare(&format!("PRAGMA foreign_key_list({});", table.name))?;
            let live_fks: Vec<(String, String, String)> = fk_stmt
                .query_map([], |row| {
                    Ok((row.get(3)?, row.get(2)?, row.get(4)?)) // from, table, to
                })?
                .collect::<std::result::Result<_, _>>()?;

            for column in table.columns {
                if let Some(expected_fk) = column.foreign_key {
                    let found = live_fks.iter().any(|(from, to_table, to_column)| {
                        from == column.name
                            && to_table == expected_fk.foreign_table
                            && to_column == expected_fk.foreign_column
                    });
                    if !found {
                        bail!(
                            "table {} column {} is missing foreign key to {}({})",
                            table.name,
                            column.name,
                            expected_fk.foreign_table,
                            expected_fk.foreign_column
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Open-or-create helper shared by both stores: creates the latest schema on
/// an empty database, validates and migrates an existing one.
pub(crate) fn open_versioned(
    conn: &Connection,
    schemas: &[VersionedSchema],
    db_label: &str,
) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON;", params![])?;

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    let latest = schemas
        .last()
        .ok_or_else(|| anyhow::anyhow!("no schemas defined for {}", db_label))?;

    if table_count == 0 {
        tracing::info!(
            "Creating {} schema at version {}",
            db_label,
            latest.version
        );
        latest.create(conn)?;
        return Ok(());
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |r| r.get(0))?;
    let version = raw_version - BASE_DB_VERSION as i64;
    if version < 0 {
        bail!(
            "{} database is not a melosync database (user_version {})",
            db_label,
            raw_version
        );
    }
    let version = version as usize;
    if version >= schemas.len() {
        bail!(
            "{} database version {} is too new (max supported: {})",
            db_label,
            version,
            schemas.len() - 1
        );
    }

    schemas[version].validate(conn)?;

    if version < latest.version {
        for schema in schemas.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                tracing::info!("Migrating {} to version {}", db_label, schema.version);
                migration_fn(conn)?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
    }

    Ok(())
}
