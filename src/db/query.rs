//! Typed relational query helpers on top of `sqlx::QueryBuilder`.
//!
//! Conditions are explicit `Predicate` values tagged by operator and joined
//! with `AND`. Table and column names are trusted identifiers supplied by this
//! crate; only values are bound as parameters.

use sqlx::postgres::{PgPool, PgRow};
use sqlx::{FromRow, Postgres, QueryBuilder};

/// A bindable column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
    Null,
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl TryFrom<u64> for Value {
    type Error = eyre::Report;

    fn try_from(v: u64) -> eyre::Result<Self> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| eyre::eyre!("Value {} does not fit a BIGINT column", v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Like(String),
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub column: String,
    pub predicate: Predicate,
}

/// A conjunction of conditions. Empty means "all rows".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, predicate: Predicate) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            predicate,
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(column, Predicate::Eq(value.into()))
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        if self.conditions.is_empty() {
            return;
        }

        qb.push(" WHERE ");
        for (i, cond) in self.conditions.iter().enumerate() {
            if i > 0 {
                qb.push(" AND ");
            }
            qb.push(&cond.column);

            match &cond.predicate {
                Predicate::Eq(Value::Null) | Predicate::IsNull => {
                    qb.push(" IS NULL");
                }
                Predicate::Ne(Value::Null) | Predicate::IsNotNull => {
                    qb.push(" IS NOT NULL");
                }
                Predicate::Like(pattern) => {
                    qb.push(" LIKE ");
                    qb.push_bind(pattern.clone());
                }
                Predicate::Eq(v) => push_comparison(qb, "=", v),
                Predicate::Ne(v) => push_comparison(qb, "!=", v),
                Predicate::Gt(v) => push_comparison(qb, ">", v),
                Predicate::Gte(v) => push_comparison(qb, ">=", v),
                Predicate::Lt(v) => push_comparison(qb, "<", v),
                Predicate::Lte(v) => push_comparison(qb, "<=", v),
            }
        }
    }
}

fn push_comparison(qb: &mut QueryBuilder<'_, Postgres>, op: &str, value: &Value) {
    qb.push(" ");
    qb.push(op);
    qb.push(" ");
    push_value(qb, value);
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Int(v) => {
            qb.push_bind(*v);
        }
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
        Value::Null => {
            qb.push("NULL");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Join {
    kind: JoinKind,
    table: String,
    left: String,
    right: String,
}

/// A SELECT statement: projection, joins, filter, grouping, ordering, paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    table: String,
    fields: Vec<String>,
    joins: Vec<Join>,
    filter: Filter,
    group_by: Vec<String>,
    order_by: Option<(String, Order)>,
    limit: Option<(i64, i64)>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            joins: Vec::new(),
            filter: Filter::new(),
            group_by: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn join(
        mut self,
        kind: JoinKind,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            kind,
            table: table.into(),
            left: left.into(),
            right: right.into(),
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, count: i64, offset: i64) -> Self {
        self.limit = Some((count, offset));
        self
    }

    pub fn to_query(&self) -> QueryBuilder<'static, Postgres> {
        let fields = if self.fields.is_empty() {
            "*".to_string()
        } else {
            self.fields.join(", ")
        };

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", fields, self.table));

        for join in &self.joins {
            qb.push(format!(
                " {} {} ON {} = {}",
                join.kind.as_sql(),
                join.table,
                join.left,
                join.right
            ));
        }

        self.filter.push_where(&mut qb);

        if !self.group_by.is_empty() {
            qb.push(" GROUP BY ");
            qb.push(self.group_by.join(", "));
        }

        if let Some((field, order)) = &self.order_by {
            qb.push(format!(
                " ORDER BY {} {}",
                field,
                match order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                }
            ));
        }

        if let Some((count, offset)) = self.limit {
            qb.push(" LIMIT ");
            qb.push_bind(count);
            qb.push(" OFFSET ");
            qb.push_bind(offset);
        }

        qb
    }
}

/// Run a SELECT and map every row.
pub async fn fetch_all<T>(pool: &PgPool, select: &Select) -> eyre::Result<Vec<T>>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let mut qb = select.to_query();
    let rows = qb.build_query_as::<T>().fetch_all(pool).await?;
    Ok(rows)
}

/// Count rows matching a filter.
pub async fn count(pool: &PgPool, table: &str, filter: &Filter) -> eyre::Result<i64> {
    let mut qb = count_query(table, filter);
    let n: i64 = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(n)
}

fn count_query(table: &str, filter: &Filter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", table));
    filter.push_where(&mut qb);
    qb
}

/// Insert one row and return its generated `id`.
pub async fn insert(pool: &PgPool, table: &str, values: &[(&str, Value)]) -> eyre::Result<i64> {
    let mut qb = insert_query(table, values)?;
    let id: i64 = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(id)
}

fn insert_query(
    table: &str,
    values: &[(&str, Value)],
) -> eyre::Result<QueryBuilder<'static, Postgres>> {
    if values.is_empty() {
        return Err(eyre::eyre!("Insert into '{}' with no columns", table));
    }

    let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) VALUES (",
        table,
        columns.join(", ")
    ));
    for (i, (_, value)) in values.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(&mut qb, value);
    }
    qb.push(") RETURNING id");
    Ok(qb)
}

/// Multi-row INSERT, chunked into groups of `chunk_size` rows to stay within
/// PostgreSQL parameter limits. Returns the number of rows written.
pub async fn insert_batch(
    pool: &PgPool,
    table: &str,
    columns: &[&str],
    rows: &[Vec<Value>],
    chunk_size: usize,
) -> eyre::Result<u64> {
    let mut written = 0;
    for chunk in rows.chunks(rows_per_statement(chunk_size, columns.len())) {
        let mut qb = insert_batch_query(table, columns, chunk);
        written += qb.build().execute(pool).await?.rows_affected();
    }
    Ok(written)
}

/// Postgres rejects statements with more bind parameters than this.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Most rows of `columns` values that fit in one statement.
pub fn max_batch_rows(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

fn rows_per_statement(chunk_size: usize, columns: usize) -> usize {
    chunk_size.clamp(1, max_batch_rows(columns))
}

fn insert_batch_query(
    table: &str,
    columns: &[&str],
    chunk: &[Vec<Value>],
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, columns.join(", ")));
    qb.push_values(chunk, |mut b, row| {
        for value in row {
            match value {
                Value::Int(v) => {
                    b.push_bind(*v);
                }
                Value::Text(v) => {
                    b.push_bind(v.clone());
                }
                Value::Null => {
                    b.push("NULL");
                }
            }
        }
    });
    qb
}

/// Update rows matching a filter; returns the affected-row count.
pub async fn update(
    pool: &PgPool,
    table: &str,
    set: &[(&str, Value)],
    filter: &Filter,
) -> eyre::Result<u64> {
    let mut qb = update_query(table, set, filter)?;
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

fn update_query(
    table: &str,
    set: &[(&str, Value)],
    filter: &Filter,
) -> eyre::Result<QueryBuilder<'static, Postgres>> {
    if set.is_empty() {
        return Err(eyre::eyre!("Update of '{}' with no columns", table));
    }

    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", table));
    for (i, (column, value)) in set.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(*column);
        qb.push(" = ");
        push_value(&mut qb, value);
    }
    filter.push_where(&mut qb);
    Ok(qb)
}
