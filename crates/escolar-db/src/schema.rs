//! Schema management: DDL execution, introspection and verification.
//!
//! The migration engine built on top of this lives in [`crate::migrations`].
//! All statements run on the `write` connection so that introspection inside
//! a migration transaction sees the schema changes made so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use escolar_common::{ConnectionRole, Error, Result};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::ddl::{self, quote_ident, ColumnDefinition, ForeignKey, TableModification, TableOptions};
use crate::params::SqlParams;
use crate::schema_map::SchemaMap;
use crate::sql_params;

/// A column as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    /// `PRI`, `UNI` or empty.
    pub key: String,
    /// `auto_increment` or empty.
    pub extra: String,
}

/// Expected shape of one table for [`SchemaManager::verify_schema_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedTable {
    #[serde(default)]
    pub columns: Vec<ExpectedColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedColumn {
    pub name: String,
}

impl ExpectedColumn {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

impl ExpectedTable {
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(ExpectedColumn::new).collect(),
        }
    }
}

/// Raw `pragma_table_info` row.
struct PragmaColumn {
    name: String,
    column_type: String,
    not_null: bool,
    default: Option<String>,
    pk: i64,
}

/// A non-partial UNIQUE index over plain columns.
struct UniqueIndex {
    /// `u` for a UNIQUE constraint, `c` for CREATE UNIQUE INDEX.
    origin: String,
    columns: Vec<String>,
}

/// DDL helpers, introspection and the migration engine.
pub struct SchemaManager {
    db: Arc<ConnectionManager>,
    map: SchemaMap,
}

impl SchemaManager {
    /// Create a schema manager using the default [`SchemaMap`].
    pub fn new(db: Arc<ConnectionManager>) -> Self {
        Self::with_map(db, SchemaMap::DEFAULT)
    }

    pub fn with_map(db: Arc<ConnectionManager>, map: SchemaMap) -> Self {
        Self { db, map }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.db
    }

    pub fn schema_map(&self) -> &SchemaMap {
        &self.map
    }

    fn run_ddl(&self, operation: &'static str, table: &str, sql: &str) -> Result<()> {
        tracing::debug!(operation, table, "Executing DDL");
        self.db
            .execute_batch(sql)
            .map_err(|e| Error::ddl(operation, table, ddl_message(e)))
    }

    /// Create `table` from column descriptors.
    pub fn create_table(
        &self,
        table: &str,
        columns: &[ColumnDefinition],
        options: &TableOptions,
    ) -> Result<()> {
        let sql = ddl::create_table_sql(table, columns, options)?;
        self.run_ddl("create_table", table, &sql)
    }

    /// Apply `modifications` to `table` as a unit: all or none.
    ///
    /// Outside a transaction, a `ModifyColumn` turns foreign key enforcement
    /// off for the rebuild and runs `foreign_key_check` before committing.
    /// Inside one the pragma has no effect, so tables taking part in foreign
    /// keys cannot be rebuilt there.
    pub fn alter_table(&self, table: &str, modifications: &[TableModification]) -> Result<()> {
        let rebuilds = modifications
            .iter()
            .any(|m| matches!(m, TableModification::ModifyColumn(_)));
        let enforced = rebuilds && self.foreign_keys_enabled()?;
        let relax_foreign_keys = enforced && !self.db.in_transaction();
        let rebuild_safe = !enforced || relax_foreign_keys;
        if relax_foreign_keys {
            self.set_foreign_keys(false)?;
        }

        let result = self.with_savepoint("alter_table", || {
            for modification in modifications {
                match modification {
                    TableModification::AddColumn(column) => {
                        self.run_ddl("add_column", table, &ddl::add_column_sql(table, column))?
                    }
                    TableModification::DropColumn(column) => {
                        self.run_ddl("drop_column", table, &ddl::drop_column_sql(table, column))?
                    }
                    TableModification::ModifyColumn(column) => {
                        self.rebuild_with(table, column, rebuild_safe)?
                    }
                }
            }
            if relax_foreign_keys {
                self.check_foreign_keys(table)?;
            }
            Ok(())
        });

        if relax_foreign_keys {
            if let Err(e) = self.set_foreign_keys(true) {
                tracing::error!("Failed to re-enable foreign keys: {}", e);
                result?;
                return Err(e);
            }
        }
        result
    }

    fn foreign_keys_enabled(&self) -> Result<bool> {
        let rows = self
            .db
            .query("PRAGMA foreign_keys", &SqlParams::None, ConnectionRole::Write)?;
        match rows.first() {
            Some(row) => Ok(row.get::<i64>("foreign_keys")? == 1),
            None => Ok(false),
        }
    }

    fn set_foreign_keys(&self, on: bool) -> Result<()> {
        let value = if on { "ON" } else { "OFF" };
        self.db.execute_batch(&format!("PRAGMA foreign_keys = {value}"))
    }

    /// Fail with the first violation reported by `PRAGMA foreign_key_check`.
    fn check_foreign_keys(&self, table: &str) -> Result<()> {
        let violations =
            self.db
                .query("PRAGMA foreign_key_check", &SqlParams::None, ConnectionRole::Write)?;
        match violations.first() {
            None => Ok(()),
            Some(row) => {
                let child: String = row.get("table")?;
                let parent: String = row.get("parent")?;
                Err(Error::ddl(
                    "modify_column",
                    table,
                    format!(
                        "{} foreign key violation(s), first in {child} referencing {parent}",
                        violations.len()
                    ),
                ))
            }
        }
    }

    /// Drop `table` if it exists.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.run_ddl("drop_table", table, &ddl::drop_table_sql(table))
    }

    fn with_savepoint<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.db.execute_batch(&format!("SAVEPOINT {name}"))?;
        match f() {
            Ok(value) => {
                self.db.execute_batch(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(undo) = self
                    .db
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
                {
                    tracing::warn!("Failed to roll back savepoint {}: {}", name, undo);
                }
                Err(e)
            }
        }
    }

    /// Whether `table` exists.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self.db.query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &sql_params![table],
            ConnectionRole::Write,
        )?;
        let count: i64 = match rows.first() {
            Some(row) => row.get("n")?,
            None => 0,
        };
        Ok(count > 0)
    }

    /// Every user table, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.db
            .query(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
                &SqlParams::None,
                ConnectionRole::Write,
            )?
            .iter()
            .map(|row| row.get("name"))
            .collect()
    }

    fn pragma_columns(&self, table: &str) -> Result<Vec<PragmaColumn>> {
        self.db
            .query(
                "SELECT name, type, \"notnull\" AS not_null, dflt_value, pk
                 FROM pragma_table_info(?1) ORDER BY cid",
                &sql_params![table],
                ConnectionRole::Write,
            )?
            .iter()
            .map(|row| {
                Ok(PragmaColumn {
                    name: row.get("name")?,
                    column_type: row.get("type")?,
                    not_null: row.get::<i64>("not_null")? != 0,
                    default: row.get("dflt_value")?,
                    pk: row.get("pk")?,
                })
            })
            .collect()
    }

    fn table_sql(&self, table: &str) -> Result<Option<String>> {
        let row = self.db.query(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &sql_params![table],
            ConnectionRole::Write,
        )?;
        match row.first() {
            Some(row) => row.get("sql"),
            None => Ok(None),
        }
    }

    /// UNIQUE indexes other than the primary key. Partial and expression
    /// indexes are left out: they do not make a column unique.
    fn unique_indexes(&self, table: &str) -> Result<Vec<UniqueIndex>> {
        let indexes = self.db.query(
            "SELECT name, origin FROM pragma_index_list(?1)
             WHERE \"unique\" = 1 AND origin != 'pk' AND partial = 0
             ORDER BY seq",
            &sql_params![table],
            ConnectionRole::Write,
        )?;

        let mut out = Vec::new();
        for index in &indexes {
            let name: String = index.get("name")?;
            let columns: Vec<Option<String>> = self
                .db
                .query(
                    "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                    &sql_params![name.as_str()],
                    ConnectionRole::Write,
                )?
                .iter()
                .map(|row| row.get("name"))
                .collect::<Result<_>>()?;
            let Some(columns) = columns.into_iter().collect::<Option<Vec<String>>>() else {
                continue;
            };
            out.push(UniqueIndex {
                origin: index.get("origin")?,
                columns,
            });
        }
        Ok(out)
    }

    /// Columns of `table` in definition order. Empty when the table is missing.
    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let columns = self.pragma_columns(table)?;
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let unique = self.unique_indexes(table)?;
        let autoincrement = self
            .table_sql(table)?
            .map(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"))
            .unwrap_or(false);
        let pk_count = columns.iter().filter(|c| c.pk > 0).count();

        Ok(columns
            .into_iter()
            .map(|c| {
                let key = if c.pk > 0 {
                    "PRI"
                } else if unique.iter().any(|i| i.columns == [c.name.as_str()]) {
                    "UNI"
                } else {
                    ""
                };
                let extra = if autoincrement
                    && pk_count == 1
                    && c.pk == 1
                    && c.column_type.eq_ignore_ascii_case("INTEGER")
                {
                    "auto_increment"
                } else {
                    ""
                };
                ColumnInfo {
                    nullable: !c.not_null && c.pk == 0,
                    name: c.name,
                    column_type: c.column_type,
                    default: c.default,
                    key: key.to_string(),
                    extra: extra.to_string(),
                }
            })
            .collect())
    }

    fn referencing_tables(&self, table: &str) -> Result<Vec<String>> {
        self.db
            .query(
                "SELECT DISTINCT m.name AS name
                 FROM sqlite_master AS m, pragma_foreign_key_list(m.name) AS f
                 WHERE m.type = 'table' AND f.\"table\" = ?1 AND m.name != ?1",
                &sql_params![table],
                ConnectionRole::Write,
            )?
            .iter()
            .map(|row| row.get("name"))
            .collect()
    }

    /// Foreign keys declared by `table`, one entry per constraint.
    fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let rows = self.db.query(
            "SELECT id, \"table\" AS parent, \"from\" AS child_column, \"to\" AS parent_column,
                    on_update, on_delete
             FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
            &sql_params![table],
            ConnectionRole::Write,
        )?;

        let mut keys: Vec<(i64, ForeignKey)> = Vec::new();
        for row in &rows {
            let id: i64 = row.get("id")?;
            let column: String = row.get("child_column")?;
            let parent_column: Option<String> = row.get("parent_column")?;
            match keys.last_mut() {
                Some((last, key)) if *last == id => {
                    key.columns.push(column);
                    key.parent_columns.extend(parent_column);
                }
                _ => keys.push((
                    id,
                    ForeignKey {
                        columns: vec![column],
                        parent_table: row.get("parent")?,
                        parent_columns: parent_column.into_iter().collect(),
                        on_update: row.get("on_update")?,
                        on_delete: row.get("on_delete")?,
                    },
                )),
            }
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    /// SQLite has no MODIFY COLUMN: rebuild the table with the new
    /// definition, copy the rows over and restore its indexes.
    ///
    /// Primary, unique and foreign keys are kept. CHECK constraints and
    /// comments on the other columns are not carried over.
    fn rebuild_with(
        &self,
        table: &str,
        column: &ColumnDefinition,
        foreign_keys_off: bool,
    ) -> Result<()> {
        const OP: &str = "modify_column";

        let existing = self.pragma_columns(table)?;
        if existing.is_empty() {
            return Err(Error::ddl(OP, table, "table does not exist"));
        }
        if !existing.iter().any(|c| c.name == column.name) {
            return Err(Error::ddl(OP, table, format!("no such column: {}", column.name)));
        }

        let foreign_keys = self.foreign_keys(table)?;
        if !foreign_keys_off {
            // With enforcement on, dropping the old table would fire ON DELETE
            // actions on its children.
            let referencing = self.referencing_tables(table)?;
            if !referencing.is_empty() {
                return Err(Error::ddl(
                    OP,
                    table,
                    format!(
                        "table is referenced by foreign keys from {} and cannot be rebuilt inside a transaction",
                        referencing.join(", ")
                    ),
                ));
            }
            if !foreign_keys.is_empty() {
                return Err(Error::ddl(
                    OP,
                    table,
                    "tables with foreign keys cannot be rebuilt inside a transaction",
                ));
            }
        }

        // The modified column's own UNIQUE flag already covers its
        // single-column constraint.
        let unique_constraints: Vec<Vec<String>> = self
            .unique_indexes(table)?
            .into_iter()
            .filter(|i| i.origin == "u")
            .map(|i| i.columns)
            .filter(|columns| !(column.unique && *columns == [column.name.as_str()]))
            .collect();

        let table_sql = self.table_sql(table)?.unwrap_or_default().to_ascii_uppercase();
        let autoincrement = table_sql.contains("AUTOINCREMENT");
        let mut pk_columns: Vec<(i64, String)> = existing
            .iter()
            .filter(|c| c.pk > 0)
            .map(|c| (c.pk, c.name.clone()))
            .collect();
        pk_columns.sort();
        let composite_pk = pk_columns.len() > 1;

        let definitions: Vec<ColumnDefinition> = existing
            .iter()
            .map(|c| {
                if c.name == column.name {
                    return column.clone();
                }
                let mut def = ColumnDefinition::new(c.name.clone(), c.column_type.clone());
                def.nullable = !c.not_null;
                def.default = c.default.clone();
                if c.pk > 0 && !composite_pk {
                    def.primary_key = true;
                    def.auto_increment =
                        autoincrement && c.column_type.eq_ignore_ascii_case("INTEGER");
                }
                def
            })
            .collect();

        let options = TableOptions {
            if_not_exists: false,
            strict: table_sql.trim_end().ends_with("STRICT"),
            without_rowid: table_sql.contains("WITHOUT ROWID"),
            primary_key: if composite_pk {
                pk_columns.into_iter().map(|(_, name)| name).collect()
            } else {
                Vec::new()
            },
            unique: unique_constraints,
            foreign_keys,
        };

        let indexes: Vec<String> = self
            .db
            .query(
                "SELECT sql FROM sqlite_master
                 WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
                &sql_params![table],
                ConnectionRole::Write,
            )?
            .iter()
            .map(|row| row.get("sql"))
            .collect::<Result<_>>()?;

        let scratch = format!("__rebuild_{table}");
        let column_list = existing
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut script = ddl::create_table_sql(&scratch, &definitions, &options)?;
        script.push_str(";\n");
        script.push_str(&format!(
            "INSERT INTO {scratch_q} ({column_list}) SELECT {column_list} FROM {table_q};\n\
             DROP TABLE {table_q};\n\
             ALTER TABLE {scratch_q} RENAME TO {table_q};\n",
            scratch_q = quote_ident(&scratch),
            table_q = quote_ident(table),
        ));
        for index in indexes {
            script.push_str(&index);
            script.push_str(";\n");
        }

        self.run_ddl(OP, table, &script)
    }

    /// Compare the live schema with `expected`, keyed by logical table name.
    ///
    /// Returns one message per missing table or column; an empty list means
    /// the schema matches. Drift is reported, never raised.
    pub fn verify_schema_integrity(
        &self,
        expected: &BTreeMap<String, ExpectedTable>,
    ) -> Result<Vec<String>> {
        let mut issues = Vec::new();

        for (logical, wanted) in expected {
            let table = self.map.table(logical);
            if !self.table_exists(table)? {
                issues.push(format!("Tabla faltante: {table}"));
                continue;
            }

            let actual: Vec<String> = self
                .table_columns(table)?
                .into_iter()
                .map(|c| c.name)
                .collect();
            for column in &wanted.columns {
                let physical = self.map.column(logical, &column.name);
                if !actual.iter().any(|c| c == physical) {
                    issues.push(format!("Columna faltante en {table}: {physical}"));
                }
            }
        }

        if issues.is_empty() {
            tracing::debug!(tables = expected.len(), "Schema verified");
        } else {
            tracing::warn!(issues = issues.len(), "Schema drift detected");
        }
        Ok(issues)
    }
}

fn ddl_message(e: Error) -> String {
    match e {
        Error::Query { message, .. } => message,
        other => other.to_string(),
    }
}
