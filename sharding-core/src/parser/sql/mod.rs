use crate::value::Value;

pub mod analyse;
pub mod mysql;

/// Closed set of statement categories, decided once while analysing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    /// Transaction control: BEGIN, COMMIT, ROLLBACK, SAVEPOINT, SET AUTOCOMMIT.
    Tcl,
    /// Schema definition: CREATE, ALTER, DROP, TRUNCATE, RENAME.
    Ddl,
    /// Session and administration: SHOW, DESC, USE, SET, EXPLAIN.
    Dal,
    /// Access control: GRANT, REVOKE, user management.
    Dcl,
}

impl StatementType {
    pub fn is_dml(&self) -> bool {
        matches!(self, StatementType::Select | StatementType::Insert | StatementType::Update | StatementType::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterMarkerType {
    Question,
    Dollar,
}

/// An occurrence of a table name. `start..stop` covers the name itself,
/// quotes included, but not the schema qualifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSegment {
    pub start: usize,
    pub stop: usize,
    pub name: String,
    pub quote: Option<char>,
    pub owner: Option<String>,
    pub alias: Option<String>,
}

/// The qualifier of a column reference such as `t_order` in `t_order.order_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSegment {
    pub start: usize,
    pub stop: usize,
    pub name: String,
    pub quote: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSegment {
    pub start: usize,
    pub stop: usize,
    pub name: String,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Like,
    Other,
}

impl BinaryOperator {
    /// The operator seen from the other side, `5 < id` reads as `id > 5`.
    pub fn reverse(&self) -> BinaryOperator {
        match self {
            BinaryOperator::Lt => BinaryOperator::Gt,
            BinaryOperator::Gt => BinaryOperator::Lt,
            BinaryOperator::LtEq => BinaryOperator::GtEq,
            BinaryOperator::GtEq => BinaryOperator::LtEq,
            other => *other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionSegment {
    Column(ColumnSegment),
    Literal { start: usize, stop: usize, value: Value },
    Parameter { start: usize, stop: usize, index: usize },
    Binary { start: usize, stop: usize, left: Box<ExpressionSegment>, op: BinaryOperator, right: Box<ExpressionSegment> },
    Between { start: usize, stop: usize, left: Box<ExpressionSegment>, low: Box<ExpressionSegment>, high: Box<ExpressionSegment>, not: bool },
    /// `list_start..list_stop` spans the parenthesised list only.
    In { start: usize, stop: usize, left: Box<ExpressionSegment>, list: Vec<ExpressionSegment>, list_start: usize, list_stop: usize, not: bool },
    Not { start: usize, stop: usize, expr: Box<ExpressionSegment> },
    Subquery { start: usize, stop: usize },
    /// Anything the analyser does not classify: functions, arithmetic, IS NULL.
    Common { start: usize, stop: usize },
}

impl ExpressionSegment {
    pub fn start(&self) -> usize {
        match self {
            ExpressionSegment::Column(c) => c.start,
            ExpressionSegment::Literal { start, .. }
            | ExpressionSegment::Parameter { start, .. }
            | ExpressionSegment::Binary { start, .. }
            | ExpressionSegment::Between { start, .. }
            | ExpressionSegment::In { start, .. }
            | ExpressionSegment::Not { start, .. }
            | ExpressionSegment::Subquery { start, .. }
            | ExpressionSegment::Common { start, .. } => *start,
        }
    }

    pub fn stop(&self) -> usize {
        match self {
            ExpressionSegment::Column(c) => c.stop,
            ExpressionSegment::Literal { stop, .. }
            | ExpressionSegment::Parameter { stop, .. }
            | ExpressionSegment::Binary { stop, .. }
            | ExpressionSegment::Between { stop, .. }
            | ExpressionSegment::In { stop, .. }
            | ExpressionSegment::Not { stop, .. }
            | ExpressionSegment::Subquery { stop, .. }
            | ExpressionSegment::Common { stop, .. } => *stop,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaginationValue {
    Literal { start: usize, stop: usize, value: i64 },
    Parameter { start: usize, stop: usize, index: usize },
}

impl PaginationValue {
    pub fn start(&self) -> usize {
        match self {
            PaginationValue::Literal { start, .. } | PaginationValue::Parameter { start, .. } => *start,
        }
    }

    pub fn stop(&self) -> usize {
        match self {
            PaginationValue::Literal { stop, .. } | PaginationValue::Parameter { stop, .. } => *stop,
        }
    }

    pub fn resolve(&self, parameters: &[Value]) -> Option<i64> {
        match self {
            PaginationValue::Literal { value, .. } => Some(*value),
            PaginationValue::Parameter { index, .. } => parameters.get(*index).and_then(|v| v.as_i64()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaginationContext {
    pub offset: Option<PaginationValue>,
    pub row_count: Option<PaginationValue>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatementContext {
    pub distinct: bool,
    pub group_by: bool,
    pub order_by: bool,
    pub pagination: Option<PaginationContext>,
    pub lock: bool,
    pub union: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertValueGroup {
    pub start: usize,
    pub stop: usize,
    pub values: Vec<ExpressionSegment>,
    /// Parameter indices used by this row, ascending.
    pub parameters: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentSegment {
    pub column: String,
    pub value: ExpressionSegment,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertStatementContext {
    pub columns: Vec<String>,
    /// Offset of the `)` closing the column list.
    pub columns_close: Option<usize>,
    pub values: Vec<InsertValueGroup>,
    pub set_assignments: Vec<AssignmentSegment>,
    pub set_parameters: Vec<usize>,
    pub insert_select: bool,
    pub on_duplicate: bool,
}

impl InsertStatementContext {
    pub fn is_set_form(&self) -> bool {
        !self.set_assignments.is_empty()
    }

    /// End offset of the last `SET` assignment.
    pub fn set_stop(&self) -> Option<usize> {
        self.set_assignments.last().map(|a| a.value.stop())
    }
}

/// Everything the router and rewriter read from one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SQLStatementContext {
    pub sql: String,
    /// End of the last significant token; trailing `;`, comments and
    /// whitespace lie beyond it.
    pub stop: usize,
    pub statement_type: StatementType,
    pub tables: Vec<TableSegment>,
    pub owners: Vec<OwnerSegment>,
    pub where_expr: Option<ExpressionSegment>,
    pub select: Option<SelectStatementContext>,
    pub insert: Option<InsertStatementContext>,
    pub contains_subquery: bool,
    pub contains_join: bool,
    pub parameter_count: usize,
    pub parameter_marker_type: ParameterMarkerType,
}

impl SQLStatementContext {
    pub fn new(sql: &str, statement_type: StatementType) -> Self {
        SQLStatementContext {
            sql: sql.to_string(),
            stop: sql.len(),
            statement_type,
            tables: vec![],
            owners: vec![],
            where_expr: None,
            select: None,
            insert: None,
            contains_subquery: false,
            contains_join: false,
            parameter_count: 0,
            parameter_marker_type: ParameterMarkerType::Question,
        }
    }

    /// Distinct logic table names in order of first appearance.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = vec![];
        for table in &self.tables {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&table.name)) {
                names.push(table.name.clone());
            }
        }
        names
    }

    /// Resolves a column qualifier to a table name through aliases.
    pub fn find_table_name(&self, owner: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.alias.as_ref().map_or(false, |a| a.eq_ignore_ascii_case(owner)))
            .or_else(|| self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(owner)))
            .map(|t| t.name.as_str())
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.alias.as_ref().map_or(false, |a| a.eq_ignore_ascii_case(name)))
    }

    pub fn pagination(&self) -> Option<&PaginationContext> {
        self.select.as_ref().and_then(|s| s.pagination.as_ref())
    }

    pub fn has_order_by(&self) -> bool {
        self.select.as_ref().map_or(false, |s| s.order_by)
    }

    pub fn has_lock(&self) -> bool {
        self.select.as_ref().map_or(false, |s| s.lock)
    }
}
