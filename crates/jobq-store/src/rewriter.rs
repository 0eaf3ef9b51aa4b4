//! Logical to physical schema name rewriting.
//!
//! Queries are written against the logical schema (`jobs`, `jobs_data`,
//! `string_udf_1`, ...). A deployment may store them under other names, so
//! every query passes through a [`QueryRewriter`] once, when the queue is
//! built.

use jobq_config::NamingConfig;
use std::collections::HashMap;

/// Logical name of the job header table.
pub const JOBS_TABLE: &str = "jobs";
/// Logical name of the job data table.
pub const JOBS_DATA_TABLE: &str = "jobs_data";

/// Maps logical names in a query template to physical names.
pub trait QueryRewriter: Send + Sync {
    /// Rewrites `query`, whose main table is `logical_table`.
    fn rewrite_query(&self, logical_table: &str, query: &str) -> String;
}

/// Leaves queries untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpQueryRewriter;

impl QueryRewriter for NoOpQueryRewriter {
    fn rewrite_query(&self, _logical_table: &str, query: &str) -> String {
        query.to_string()
    }
}

/// Rewrites table names everywhere and UDF column aliases in `jobs_data`
/// queries.
///
/// Only whole identifiers are replaced, so `jobs` inside `jobs_data` is left
/// alone, and single-quoted literals are never touched.
#[derive(Debug, Clone)]
pub struct TableNameQueryRewriter {
    tables: HashMap<&'static str, String>,
    columns: HashMap<&'static str, String>,
}

impl TableNameQueryRewriter {
    #[must_use]
    pub fn new(naming: &NamingConfig) -> Self {
        let mut tables = HashMap::new();
        let mut columns = HashMap::new();
        for (logical, physical) in naming.entries() {
            if logical == JOBS_TABLE || logical == JOBS_DATA_TABLE {
                tables.insert(logical, physical.to_string());
            } else {
                columns.insert(logical, physical.to_string());
            }
        }
        Self { tables, columns }
    }
}

impl QueryRewriter for TableNameQueryRewriter {
    fn rewrite_query(&self, logical_table: &str, query: &str) -> String {
        let rewrite_columns = logical_table == JOBS_DATA_TABLE;
        substitute_identifiers(query, |ident| {
            self.tables.get(ident).or_else(|| {
                if rewrite_columns {
                    self.columns.get(ident)
                } else {
                    None
                }
            })
        })
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn substitute_identifiers<'a, F>(query: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a String>,
{
    let mut out = String::with_capacity(query.len() + 16);
    let mut token_start: Option<usize> = None;
    let mut in_literal = false;

    let flush = |out: &mut String, token: &str| match lookup(token) {
        Some(physical) => out.push_str(physical),
        None => out.push_str(token),
    };

    for (i, c) in query.char_indices() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        if is_identifier_char(c) {
            token_start.get_or_insert(i);
            continue;
        }
        if let Some(start) = token_start.take() {
            flush(&mut out, &query[start..i]);
        }
        if c == '\'' {
            in_literal = true;
        }
        out.push(c);
    }
    if let Some(start) = token_start {
        flush(&mut out, &query[start..]);
    }

    out
}
