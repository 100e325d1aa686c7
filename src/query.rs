//! Query expressions: a small predicate tree for PuppetDB queries.
//!
//! Callers compose `Query` values; only the transport turns them into the
//! PuppetDB AST wire form via [`Query::to_ast`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    And(Vec<Query>),
    Or(Vec<Query>),
    Compare {
        op: CompareOp,
        field: String,
        value: Value,
    },
    /// `["null?", field, is_null]`
    IsNull { field: String, is_null: bool },
    /// `["in", field, ["extract", extract, [<entity>, query]]]`
    In {
        field: String,
        extract: String,
        from: Subquery,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    /// Regular expression match (`~`).
    Match,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Match => "~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub entity: Entity,
    pub query: Box<Query>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Nodes,
    Reports,
}

impl Entity {
    fn select(self) -> &'static str {
        match self {
            Self::Nodes => "select_nodes",
            Self::Reports => "select_reports",
        }
    }
}

impl Query {
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Eq, field, value)
    }

    pub fn less_than(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Lt, field, value)
    }

    pub fn matches(field: &str, pattern: &str) -> Self {
        Self::compare(CompareOp::Match, field, pattern)
    }

    pub fn compare(op: CompareOp, field: &str, value: impl Into<Value>) -> Self {
        Self::Compare {
            op,
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn is_null(field: &str, is_null: bool) -> Self {
        Self::IsNull {
            field: field.to_string(),
            is_null,
        }
    }

    /// `field` is one of the `extract` values selected from `entity`.
    pub fn in_subquery(field: &str, extract: &str, entity: Entity, query: Query) -> Self {
        Self::In {
            field: field.to_string(),
            extract: extract.to_string(),
            from: Subquery {
                entity,
                query: Box::new(query),
            },
        }
    }

    pub fn and(self, other: Query) -> Self {
        match self {
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            }
            q => Self::And(vec![q, other]),
        }
    }

    pub fn or(self, other: Query) -> Self {
        match self {
            Self::Or(mut terms) => {
                terms.push(other);
                Self::Or(terms)
            }
            q => Self::Or(vec![q, other]),
        }
    }

    // ── Builders used by the dashboard jobs ──────────────────

    /// Nodes that have not been deactivated.
    pub fn active_nodes() -> Self {
        Self::in_subquery(
            "certname",
            "certname",
            Entity::Nodes,
            Self::is_null("deactivated", true),
        )
    }

    /// Latest report of every active node.
    pub fn latest_active_reports() -> Self {
        Self::equals("latest_report?", true).and(Self::active_nodes())
    }

    /// Nodes whose latest report has the given status.
    pub fn latest_report_status(status: &str) -> Self {
        Self::equals("latest_report_status", status)
    }

    /// Nodes whose last report is older than `cutoff`.
    pub fn reported_before(cutoff: DateTime<Utc>) -> Self {
        Self::less_than(
            "report_timestamp",
            cutoff.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }

    /// Nodes that reported before `cutoff` or never reported at all.
    pub fn unreported_since(cutoff: DateTime<Utc>) -> Self {
        Self::reported_before(cutoff).or(Self::is_null("report_timestamp", true))
    }

    /// Nodes whose latest report was a noop run.
    pub fn latest_noop_nodes() -> Self {
        Self::in_subquery(
            "certname",
            "certname",
            Entity::Reports,
            Self::equals("noop", true).and(Self::equals("latest_report?", true)),
        )
    }

    pub fn certname_matches(pattern: &str) -> Self {
        Self::matches("certname", pattern)
    }

    /// Render to the PuppetDB AST (JSON array form).
    pub fn to_ast(&self) -> Value {
        match self {
            Self::And(terms) => boolean("and", terms),
            Self::Or(terms) => boolean("or", terms),
            Self::Compare { op, field, value } => json!([op.symbol(), field, value]),
            Self::IsNull { field, is_null } => json!(["null?", field, is_null]),
            Self::In {
                field,
                extract,
                from,
            } => json!([
                "in",
                field,
                ["extract", extract, [from.entity.select(), from.query.to_ast()]]
            ]),
        }
    }

    /// Compact string form, as sent in the `query` parameter.
    pub fn render(&self) -> String {
        self.to_ast().to_string()
    }
}

fn boolean(op: &str, terms: &[Query]) -> Value {
    let mut ast = vec![Value::from(op)];
    ast.extend(terms.iter().map(Query::to_ast));
    Value::Array(ast)
}
