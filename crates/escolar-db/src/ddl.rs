//! DDL statement builders.
//!
//! Structured column and table descriptors rendered to SQLite DDL. The
//! schema manager executes these; code migrations can also render them
//! directly.

use escolar_common::{Error, Result};

/// Quote an identifier for SQLite (`"name"`, embedded quotes doubled).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal (`'text'`, embedded quotes doubled).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A column in a CREATE TABLE or ALTER TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    /// Default as an SQL expression (`0`, `'student'`, `CURRENT_TIMESTAMP`).
    pub default: Option<String>,
    /// Rendered as `CHECK (col >= 0)`.
    pub unsigned: bool,
    /// Rendered as `INTEGER PRIMARY KEY AUTOINCREMENT`.
    pub auto_increment: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// Kept inline as `/* ... */`, so it survives in `sqlite_master.sql`.
    pub comment: Option<String>,
}

impl ColumnDefinition {
    /// A nullable column with no constraints.
    pub fn new<N: Into<String>, T: Into<String>>(name: N, column_type: T) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            default: None,
            unsigned: false,
            auto_increment: false,
            primary_key: false,
            unique: false,
            comment: None,
        }
    }

    /// `INTEGER PRIMARY KEY AUTOINCREMENT` id column.
    pub fn increments<N: Into<String>>(name: N) -> Self {
        Self::new(name, "INTEGER").auto_increment()
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_expr<S: Into<String>>(mut self, expr: S) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Default as a quoted string literal.
    pub fn default_text(self, text: &str) -> Self {
        self.default_expr(quote_literal(text))
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn comment<S: Into<String>>(mut self, comment: S) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Render the column definition.
    pub fn to_sql(&self) -> String {
        let name = quote_ident(&self.name);
        let mut sql = if self.auto_increment {
            format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT")
        } else {
            let mut sql = format!("{name} {}", self.column_type);
            if self.primary_key {
                sql.push_str(" PRIMARY KEY");
            }
            if !self.nullable {
                sql.push_str(" NOT NULL");
            }
            if self.unique {
                sql.push_str(" UNIQUE");
            }
            if let Some(default) = &self.default {
                sql.push_str(" DEFAULT ");
                sql.push_str(&default_clause(default));
            }
            sql
        };

        if self.unsigned {
            sql.push_str(&format!(" CHECK ({name} >= 0)"));
        }
        if let Some(comment) = &self.comment {
            sql.push_str(&format!(" /* {} */", comment.replace("*/", "* /")));
        }
        sql
    }
}

// Anything beyond a literal, a keyword or a signed number must be
// parenthesized to be accepted as a column default.
fn default_clause(expr: &str) -> String {
    let trimmed = expr.trim();
    let is_simple = trimmed.starts_with('\'')
        || trimmed.starts_with('(')
        || trimmed.parse::<f64>().is_ok()
        || trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_simple {
        trimmed.to_string()
    } else {
        format!("({trimmed})")
    }
}

/// Table-level options for CREATE TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    pub if_not_exists: bool,
    /// SQLite STRICT typing.
    pub strict: bool,
    pub without_rowid: bool,
    /// Composite primary key; leave empty to use column-level keys.
    pub primary_key: Vec<String>,
    /// Table-level `UNIQUE (...)` constraints, one column list each.
    pub unique: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
}

/// A table-level `FOREIGN KEY` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub parent_table: String,
    /// Empty to reference the parent's primary key.
    pub parent_columns: Vec<String>,
    /// `CASCADE`, `SET NULL`, ...; `None` for the default `NO ACTION`.
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

impl ForeignKey {
    pub fn to_sql(&self) -> String {
        let idents = |names: &[String]| {
            names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", ")
        };
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {}",
            idents(&self.columns),
            quote_ident(&self.parent_table)
        );
        if !self.parent_columns.is_empty() {
            sql.push_str(&format!(" ({})", idents(&self.parent_columns)));
        }
        for (event, action) in [("UPDATE", &self.on_update), ("DELETE", &self.on_delete)] {
            match action.as_deref().map(str::trim) {
                Some(action) if !action.eq_ignore_ascii_case("NO ACTION") && !action.is_empty() => {
                    sql.push_str(&format!(" ON {event} {}", action.to_ascii_uppercase()));
                }
                _ => {}
            }
        }
        sql
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            if_not_exists: true,
            strict: false,
            without_rowid: false,
            primary_key: Vec::new(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }
}

/// One change applied by ALTER TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableModification {
    AddColumn(ColumnDefinition),
    DropColumn(String),
    /// Replace the definition of an existing column (matched by name).
    ModifyColumn(ColumnDefinition),
}

impl TableModification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddColumn(_) => "add_column",
            Self::DropColumn(_) => "drop_column",
            Self::ModifyColumn(_) => "modify_column",
        }
    }
}

/// Render a CREATE TABLE statement.
pub fn create_table_sql(
    table: &str,
    columns: &[ColumnDefinition],
    options: &TableOptions,
) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::ddl("create_table", table, "no columns given"));
    }

    let mut parts: Vec<String> = columns.iter().map(ColumnDefinition::to_sql).collect();
    if !options.primary_key.is_empty() {
        let keys: Vec<String> = options.primary_key.iter().map(|k| quote_ident(k)).collect();
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    for columns in options.unique.iter().filter(|c| !c.is_empty()) {
        let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("UNIQUE ({})", columns.join(", ")));
    }
    parts.extend(options.foreign_keys.iter().map(ForeignKey::to_sql));

    let mut sql = String::from("CREATE TABLE ");
    if options.if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&quote_ident(table));
    sql.push_str(" (\n    ");
    sql.push_str(&parts.join(",\n    "));
    sql.push_str("\n)");

    let mut suffixes = Vec::new();
    if options.strict {
        suffixes.push("STRICT");
    }
    if options.without_rowid {
        suffixes.push("WITHOUT ROWID");
    }
    if !suffixes.is_empty() {
        sql.push(' ');
        sql.push_str(&suffixes.join(", "));
    }
    Ok(sql)
}

/// Render `ALTER TABLE ... ADD COLUMN`.
pub fn add_column_sql(table: &str, column: &ColumnDefinition) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column.to_sql()
    )
}

/// Render `ALTER TABLE ... DROP COLUMN`.
pub fn drop_column_sql(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(column)
    )
}

/// Render `DROP TABLE IF EXISTS`.
pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}
