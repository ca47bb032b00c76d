//! Read-only query guard.
//!
//! The sole defense against destructive or exfiltrating statements reaching
//! the practice database. Every query path — the model-facing tool and any
//! caller added later — must pass [`validate`] before execution.
//!
//! Two checks, applied in order:
//! 1. the trimmed statement must begin with `SELECT` (case-insensitive);
//!    the rejection names the offending leading keyword
//! 2. no denylisted mutating/DDL keyword may appear anywhere as a whole
//!    word, so `SELECT 1; DROP TABLE x` is caught even though it leads
//!    with the read keyword

use std::sync::OnceLock;

use regex::Regex;

/// Mutating and DDL keywords that must never reach the database.
pub const DENYLIST: [&str; 9] = [
    "CREATE", "ALTER", "DROP", "TRUNCATE", "INSERT", "UPDATE", "DELETE", "GRANT", "REVOKE",
];

/// A query refused by the guard or failed during execution.
///
/// The two guard variants are security rejections; [`Execution`] is a
/// storage-level failure on an already-validated statement. All three are
/// recoverable — they are surfaced to the model as tool-result error text so
/// it can retry with a corrected query.
///
/// [`Execution`]: QueryRejection::Execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryRejection {
    /// The statement does not begin with the read-only query keyword.
    #[error("only SELECT queries are allowed, statement begins with {found}")]
    NotReadOnly {
        /// The offending leading keyword, uppercased.
        found: String,
    },
    /// The statement contains a denylisted keyword as a whole word.
    #[error("query contains forbidden keyword: {keyword}")]
    ForbiddenKeyword {
        /// The matched denylist keyword, uppercased.
        keyword: String,
    },
    /// The statement passed validation but failed during execution.
    #[error("query execution failed: {0}")]
    Execution(String),
}

fn denylist_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = DENYLIST.join("|");
        // Whole-word match only; "updated_at" must not trip on UPDATE.
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("denylist pattern is static")
    })
}

/// Validate that a statement is provably read-only.
///
/// # Errors
///
/// Returns [`QueryRejection::NotReadOnly`] when the statement does not begin
/// with `SELECT`, or [`QueryRejection::ForbiddenKeyword`] when a denylisted
/// keyword appears as a whole word anywhere in it.
pub fn validate(query: &str) -> Result<(), QueryRejection> {
    let trimmed = query.trim();
    let leading = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();

    if leading != "SELECT" {
        return Err(QueryRejection::NotReadOnly {
            found: if leading.is_empty() {
                "<empty>".to_owned()
            } else {
                leading
            },
        });
    }

    if let Some(matched) = denylist_pattern().find(trimmed) {
        return Err(QueryRejection::ForbiddenKeyword {
            keyword: matched.as_str().to_uppercase(),
        });
    }

    Ok(())
}
