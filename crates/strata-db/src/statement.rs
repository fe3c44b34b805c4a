/// Coarse classification of a SQL statement by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// `SELECT`, `WITH`, `SHOW` or `EXPLAIN`. Eligible for the query cache.
    Read,
    /// Anything else: DML, DDL, transaction control.
    Write,
}

const READ_KEYWORDS: [&str; 4] = ["SELECT", "WITH", "SHOW", "EXPLAIN"];

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        let leading = sql.trim_start().as_bytes();
        let is_read = READ_KEYWORDS.iter().any(|keyword| {
            leading.len() >= keyword.len()
                && leading[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes())
        });
        if is_read {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }

    pub fn is_read(self) -> bool {
        self == StatementKind::Read
    }
}
