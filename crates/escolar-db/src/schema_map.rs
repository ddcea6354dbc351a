//! Logical-to-physical name translation for tables and columns.
//!
//! Application code refers to tables and columns by their logical names.
//! The map translates them to the names the schema actually uses and keeps a
//! whitelist of valid physical columns per table, used to validate dynamic
//! column lists (sorting, partial updates) before they reach SQL text.
//!
//! Unmapped names always pass through unchanged.

use std::collections::BTreeMap;

use crate::schema::{ExpectedColumn, ExpectedTable};

type Pairs = &'static [(&'static str, &'static str)];

/// Static name-resolution tables.
#[derive(Debug, Clone, Copy)]
pub struct SchemaMap {
    tables: Pairs,
    columns: &'static [(&'static str, Pairs)],
    whitelist: &'static [(&'static str, &'static [&'static str])],
}

const TABLES: Pairs = &[
    ("terms", "academic_periods"),
    ("periods", "academic_periods"),
    ("lessons", "modules"),
    ("inscriptions", "enrollments"),
];

const COLUMNS: &[(&str, Pairs)] = &[
    (
        "users",
        &[
            ("name", "full_name"),
            ("password", "password_hash"),
            ("is_active", "active"),
        ],
    ),
    ("subjects", &[("course", "course_id"), ("teacher", "teacher_id")]),
    ("modules", &[("subject", "subject_id"), ("order", "position")]),
    (
        "academic_periods",
        &[
            ("starts_on", "start_date"),
            ("ends_on", "end_date"),
            ("current", "is_current"),
        ],
    ),
    (
        "enrollments",
        &[
            ("student", "student_id"),
            ("course", "course_id"),
            ("term", "period_id"),
            ("code", "enrollment_code"),
        ],
    ),
];

const WHITELIST: &[(&str, &[&str])] = &[
    (
        "users",
        &[
            "id",
            "email",
            "full_name",
            "password_hash",
            "role",
            "active",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "courses",
        &["id", "code", "name", "description", "active", "created_at"],
    ),
    (
        "subjects",
        &["id", "course_id", "code", "name", "credits", "teacher_id", "created_at"],
    ),
    (
        "modules",
        &["id", "subject_id", "title", "position", "content", "created_at"],
    ),
    (
        "academic_periods",
        &["id", "name", "start_date", "end_date", "is_current", "created_at"],
    ),
    (
        "enrollments",
        &[
            "id",
            "student_id",
            "course_id",
            "period_id",
            "enrollment_code",
            "status",
            "enrolled_at",
        ],
    ),
];

impl SchemaMap {
    /// The map for the schema created by the built-in migrations.
    pub const DEFAULT: SchemaMap = SchemaMap::new(TABLES, COLUMNS, WHITELIST);

    /// A map over custom tables.
    pub const fn new(
        tables: Pairs,
        columns: &'static [(&'static str, Pairs)],
        whitelist: &'static [(&'static str, &'static [&'static str])],
    ) -> Self {
        Self {
            tables,
            columns,
            whitelist,
        }
    }

    /// Physical table name for `logical`.
    pub fn table<'a>(&self, logical: &'a str) -> &'a str {
        lookup(self.tables, logical).unwrap_or(logical)
    }

    /// Physical column name for `column` of `table`.
    pub fn column<'a>(&self, table: &str, column: &'a str) -> &'a str {
        let physical = self.table(table);
        self.columns
            .iter()
            .find(|(t, _)| *t == physical)
            .and_then(|(_, pairs)| lookup(*pairs, column))
            .unwrap_or(column)
    }

    /// Whether `column` is a whitelisted column of `table`.
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        let physical = self.column(table, column);
        self.columns(table).iter().any(|c| *c == physical)
    }

    /// Whitelisted columns of `table`, in schema order.
    pub fn columns(&self, table: &str) -> &'static [&'static str] {
        let physical = self.table(table);
        self.whitelist
            .iter()
            .find(|(t, _)| *t == physical)
            .map(|(_, cols)| *cols)
            .unwrap_or(&[])
    }

    /// Every table with a whitelist entry.
    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.whitelist.iter().map(|(t, _)| *t)
    }

    /// The whitelist as input for schema verification.
    pub fn expected_schema(&self) -> BTreeMap<String, ExpectedTable> {
        self.whitelist
            .iter()
            .map(|(table, columns)| {
                let expected = ExpectedTable {
                    columns: columns
                        .iter()
                        .map(|c| ExpectedColumn::new(*c))
                        .collect(),
                };
                (table.to_string(), expected)
            })
            .collect()
    }
}

impl Default for SchemaMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// Returning the 'static side lets callers keep whichever lifetime is shorter.
fn lookup<'a>(pairs: &'static [(&'static str, &'static str)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}
