//! Allow-list validation for dataset queries.
//!
//! Queries are parsed with sqlparser and only a single `SELECT` over the
//! dataset's own table is accepted. The accepted statement is rewritten so
//! that every identifier is quoted and bound to the physical table, then
//! rendered back to SQL for DataFusion.

use std::ops::ControlFlow;

use datafusion::sql::sqlparser::{
    ast::{
        BinaryOperator, CastKind, DataType, Distinct, Expr, Function, FunctionArg,
        FunctionArgExpr, FunctionArguments, GroupByExpr, Ident, LimitClause, ObjectName,
        ObjectNamePart, OrderByExpr, OrderByKind, Query, Select, SelectFlavor, SelectItem,
        SelectItemQualifiedWildcardKind, SetExpr, Statement, TableFactor, UnaryOperator, Value,
        VisitMut, VisitorMut, WildcardAdditionalOptions,
    },
    dialect::GenericDialect,
    keywords::Keyword,
    parser::{Parser, ParserError},
    tokenizer::{Token, Tokenizer},
};

use crate::error::AnalysisError;

/// Logical table name callers use instead of the physical one.
pub const DATASET_PLACEHOLDER: &str = "dataset";

/// Deepest expression nesting the parser follows before giving up.
const MAX_NESTING_DEPTH: usize = 32;

/// Words that never appear unquoted in an accepted query.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "UPSERT", "GRANT", "REVOKE", "ATTACH", "DETACH", "COPY", "PRAGMA", "VACUUM", "SET", "CALL",
    "EXEC", "EXECUTE", "INTO",
];

const AGGREGATE_FUNCTIONS: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX", "MEDIAN", "STDDEV"];

const SCALAR_FUNCTIONS: &[&str] = &[
    "LOWER", "UPPER", "LENGTH", "TRIM", "ROUND", "ABS", "COALESCE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The statement is not a read of the dataset's own table.
    Unsafe(String),
    /// A read that does not fit the grammar.
    Syntax(String),
}

impl From<ParseError> for AnalysisError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Unsafe(message) => AnalysisError::UnsafeQuery { message },
            ParseError::Syntax(message) => AnalysisError::Query { message },
        }
    }
}

impl From<ParserError> for ParseError {
    fn from(err: ParserError) -> Self {
        match err {
            ParserError::RecursionLimitExceeded => {
                ParseError::Syntax("Query is nested too deeply".to_string())
            }
            other => ParseError::Syntax(other.to_string()),
        }
    }
}

fn syntax<T>(message: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError::Syntax(message.into()))
}

fn rejected<T>(message: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError::Unsafe(message.into()))
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Unquoted identifiers fold to lower case; every identifier leaves quoted.
fn fold_identifier(ident: &Ident) -> Ident {
    match ident.quote_style {
        None => Ident::with_quote('"', ident.value.to_lowercase()),
        Some(_) => Ident::with_quote('"', ident.value.clone()),
    }
}

fn same_name(reference: &str, candidate: &str) -> bool {
    reference.eq_ignore_ascii_case(candidate)
}

/// A validated `SELECT` over the dataset table.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    select: Select,
    order_by: Vec<OrderByExpr>,
    row_level: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Every query shape the gateway accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryShape {
    Select(SelectQuery),
}

impl SelectQuery {
    /// True when each output row corresponds to exactly one stored row.
    pub fn is_row_level(&self) -> bool {
        self.row_level
    }

    /// `SELECT ... FROM ... [WHERE] [GROUP BY] [HAVING]` against `table_name`,
    /// without ordering or paging.
    pub fn render_core(&self, table_name: &str) -> String {
        let mut select = self.select.clone();
        if let Some(from) = select.from.first_mut() {
            if let TableFactor::Table { name, alias, .. } = &mut from.relation {
                *name = ObjectName::from(vec![Ident::with_quote('"', table_name)]);
                *alias = None;
            }
        }
        select.to_string()
    }

    /// The ORDER BY clause, or `fallback` ascending when none was given and
    /// the query is row-level.
    pub fn render_order_by(&self, fallback: Option<&str>) -> String {
        if !self.order_by.is_empty() {
            let items: Vec<String> = self.order_by.iter().map(|o| o.to_string()).collect();
            return format!(" ORDER BY {}", items.join(", "));
        }
        match fallback {
            Some(column) if self.row_level => {
                format!(" ORDER BY {} ASC", quote_identifier(column))
            }
            _ => String::new(),
        }
    }
}

/// Rewrites expressions in place and rejects anything off the allow-list.
///
/// Security violations break the walk immediately. Grammar violations are
/// remembered and reported once the walk has finished, so an unsafe construct
/// anywhere in the query always wins over a syntax complaint.
struct ExprRewriter<'a> {
    qualifiers: &'a [String],
    aggregates: usize,
    first_unsupported: Option<String>,
}

impl<'a> ExprRewriter<'a> {
    fn new(qualifiers: &'a [String]) -> Self {
        Self {
            qualifiers,
            aggregates: 0,
            first_unsupported: None,
        }
    }

    fn unsupported(&mut self, message: String) {
        self.first_unsupported.get_or_insert(message);
    }

    fn knows(&self, qualifier: &Ident) -> bool {
        self.qualifiers
            .iter()
            .any(|known| same_name(known, &qualifier.value))
    }

    fn check_function(&mut self, function: &mut Function) {
        let name = match function.name.0.as_slice() {
            [ObjectNamePart::Identifier(ident)] if ident.quote_style.is_none() => {
                ident.value.to_ascii_uppercase()
            }
            _ => {
                return self.unsupported(format!("Function {} is not supported", function.name))
            }
        };
        let aggregate = AGGREGATE_FUNCTIONS.contains(&name.as_str());
        if !aggregate && !SCALAR_FUNCTIONS.contains(&name.as_str()) {
            return self.unsupported(format!("Function {} is not supported", function.name));
        }
        if function.over.is_some()
            || function.filter.is_some()
            || function.null_treatment.is_some()
            || !function.within_group.is_empty()
            || function.uses_odbc_syntax
            || !matches!(function.parameters, FunctionArguments::None)
        {
            return self.unsupported(format!("Unsupported form of {}", name));
        }
        match &function.args {
            FunctionArguments::List(list) => {
                let plain_args = list.args.iter().all(|arg| {
                    matches!(
                        arg,
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(_) | FunctionArgExpr::Wildcard)
                    )
                });
                if !plain_args || !list.clauses.is_empty() {
                    return self.unsupported(format!("Unsupported arguments to {}", name));
                }
            }
            // The nested query is rejected when the walk reaches it.
            FunctionArguments::Subquery(_) => {}
            FunctionArguments::None => {
                return self.unsupported(format!("{} needs an argument list", name));
            }
        }
        if aggregate {
            self.aggregates += 1;
        }
        function.name = ObjectName::from(vec![Ident::new(name)]);
    }
}

impl VisitorMut for ExprRewriter<'_> {
    type Break = String;

    fn pre_visit_query(&mut self, _query: &mut Query) -> ControlFlow<String> {
        ControlFlow::Break("Subqueries are not allowed".to_string())
    }

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<String> {
        let replacement = match &mut *expr {
            Expr::Identifier(ident) => Some(Expr::Identifier(fold_identifier(ident))),
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [qualifier, column] if self.knows(qualifier) => {
                    Some(Expr::Identifier(fold_identifier(column)))
                }
                _ => {
                    let reference: Vec<&str> = parts.iter().map(|p| p.value.as_str()).collect();
                    return ControlFlow::Break(format!(
                        "Reference to {} is not allowed; only the dataset table may be used",
                        reference.join(".")
                    ));
                }
            },
            Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => {
                return ControlFlow::Break("Subqueries are not allowed".to_string());
            }
            Expr::Value(value) => {
                if !matches!(
                    value.value,
                    Value::Number(..) | Value::SingleQuotedString(_) | Value::Boolean(_) | Value::Null
                ) {
                    self.unsupported(format!("Unsupported literal {}", value.value));
                }
                None
            }
            Expr::BinaryOp { op, .. } => {
                if !matches!(
                    op,
                    BinaryOperator::Plus
                        | BinaryOperator::Minus
                        | BinaryOperator::Multiply
                        | BinaryOperator::Divide
                        | BinaryOperator::Modulo
                        | BinaryOperator::Eq
                        | BinaryOperator::NotEq
                        | BinaryOperator::Lt
                        | BinaryOperator::LtEq
                        | BinaryOperator::Gt
                        | BinaryOperator::GtEq
                        | BinaryOperator::And
                        | BinaryOperator::Or
                ) {
                    self.unsupported(format!("Unsupported operator {}", op));
                }
                None
            }
            Expr::UnaryOp { op, .. } => {
                if !matches!(
                    op,
                    UnaryOperator::Not | UnaryOperator::Minus | UnaryOperator::Plus
                ) {
                    self.unsupported(format!("Unsupported operator {}", op));
                }
                None
            }
            Expr::Like {
                any, escape_char, ..
            }
            | Expr::ILike {
                any, escape_char, ..
            } => {
                if *any || escape_char.is_some() {
                    self.unsupported("Unsupported LIKE form".to_string());
                }
                None
            }
            Expr::Cast {
                kind,
                data_type,
                format,
                ..
            } => {
                let known_type = matches!(
                    data_type,
                    DataType::Int(_)
                        | DataType::Integer(_)
                        | DataType::BigInt(_)
                        | DataType::Float(_)
                        | DataType::Real
                        | DataType::Double(_)
                        | DataType::DoublePrecision
                        | DataType::Varchar(_)
                        | DataType::Text
                        | DataType::String(_)
                        | DataType::Boolean
                        | DataType::Bool
                        | DataType::Timestamp(..)
                        | DataType::Date
                );
                let known_kind = matches!(
                    kind,
                    CastKind::Cast | CastKind::TryCast | CastKind::DoubleColon
                );
                if !known_type || !known_kind || format.is_some() {
                    self.unsupported(format!("Unsupported cast to {}", data_type));
                }
                None
            }
            Expr::Trim {
                trim_where,
                trim_what,
                trim_characters,
                ..
            } => {
                if trim_where.is_some() || trim_what.is_some() || trim_characters.is_some() {
                    self.unsupported("Only TRIM(expr) is supported".to_string());
                }
                None
            }
            Expr::Function(function) => {
                self.check_function(function);
                None
            }
            Expr::Nested(_)
            | Expr::IsNull(_)
            | Expr::IsNotNull(_)
            | Expr::InList { .. }
            | Expr::Between { .. } => None,
            other => {
                self.unsupported(format!("Unsupported expression {}", other));
                None
            }
        };
        if let Some(replacement) = replacement {
            *expr = replacement;
        }
        ControlFlow::Continue(())
    }
}

fn rewrite(expr: &mut Expr, rewriter: &mut ExprRewriter<'_>) -> Result<(), ParseError> {
    match expr.visit(rewriter) {
        ControlFlow::Break(message) => rejected(message),
        ControlFlow::Continue(()) => Ok(()),
    }
}

/// Statement-level checks done on raw tokens, before any grammar applies.
fn screen_tokens(text: &str) -> Result<(), ParseError> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, text)
        .tokenize()
        .map_err(|e| ParseError::Syntax(e.to_string()))?;

    let mut significant = tokens
        .iter()
        .filter(|token| !matches!(token, Token::Whitespace(_) | Token::EOF));
    match significant.clone().find(|token| !matches!(token, Token::SemiColon)) {
        None => return syntax("Query is empty"),
        Some(Token::Word(word)) if word.keyword == Keyword::SELECT => {}
        Some(other) => {
            return rejected(format!("Only SELECT queries are allowed, found {}", other))
        }
    }

    if let Some(word) = significant.find_map(|token| match token {
        Token::Word(word)
            if word.quote_style.is_none()
                && FORBIDDEN_KEYWORDS.contains(&word.value.to_ascii_uppercase().as_str()) =>
        {
            Some(word)
        }
        _ => None,
    }) {
        return rejected(format!("{} is not allowed", word.value.to_ascii_uppercase()));
    }
    Ok(())
}

/// Table name, alias and parse-time checks for the single `FROM` item.
fn bind_relation(select: &Select, table_name: &str) -> Result<Vec<String>, ParseError> {
    let from = match select.from.as_slice() {
        [] => return syntax("Query needs a FROM clause"),
        [from] => from,
        _ => return rejected("Only the dataset table may be queried"),
    };
    if !from.joins.is_empty() {
        return rejected("Joins are not allowed");
    }
    let TableFactor::Table {
        name,
        alias,
        args: None,
        with_hints,
        version,
        with_ordinality,
        partitions,
        json_path,
        sample,
        index_hints,
    } = &from.relation
    else {
        return rejected("Only the dataset table may be queried");
    };

    let table = match name.0.as_slice() {
        [ObjectNamePart::Identifier(ident)] => ident.value.clone(),
        _ => {
            return rejected(format!(
                "Table {} is not accessible; query the dataset as {}",
                name, DATASET_PLACEHOLDER
            ))
        }
    };
    if !same_name(&table, DATASET_PLACEHOLDER) && !same_name(&table, table_name) {
        return rejected(format!(
            "Table {} is not accessible; query the dataset as {}",
            table, DATASET_PLACEHOLDER
        ));
    }
    if !with_hints.is_empty()
        || version.is_some()
        || *with_ordinality
        || !partitions.is_empty()
        || json_path.is_some()
        || sample.is_some()
        || !index_hints.is_empty()
    {
        return syntax("Table modifiers are not supported");
    }

    let mut qualifiers = vec![table];
    if let Some(alias) = alias {
        if !alias.columns.is_empty() {
            return syntax("Column aliases on the table are not supported");
        }
        qualifiers.push(alias.name.value.clone());
    }
    Ok(qualifiers)
}

fn reject_unsupported_clauses(select: &Select) -> Result<(), ParseError> {
    if select.into.is_some() {
        return rejected("SELECT INTO is not allowed");
    }
    let unsupported = select.top.is_some()
        || select.exclude.is_some()
        || !select.lateral_views.is_empty()
        || select.prewhere.is_some()
        || !select.cluster_by.is_empty()
        || !select.distribute_by.is_empty()
        || !select.sort_by.is_empty()
        || !select.named_window.is_empty()
        || select.qualify.is_some()
        || select.value_table_mode.is_some()
        || select.connect_by.is_some()
        || !matches!(select.flavor, SelectFlavor::Standard)
        || matches!(select.distinct, Some(Distinct::On(_)))
        || matches!(select.group_by, GroupByExpr::All(_))
        || matches!(&select.group_by, GroupByExpr::Expressions(_, modifiers) if !modifiers.is_empty());
    if unsupported {
        return syntax("Query uses a clause that is not supported");
    }
    if select.projection.is_empty() {
        return syntax("Query selects no columns");
    }
    Ok(())
}

fn count_literal(expr: &Expr, clause: &str) -> Result<u64, ParseError> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::Number(number, _) => number
                .to_string()
                .parse::<u64>()
                .or_else(|_| syntax(format!("{} expects a non-negative integer", clause))),
            _ => syntax(format!("{} expects a non-negative integer", clause)),
        },
        _ => syntax(format!("{} expects a non-negative integer", clause)),
    }
}

fn limit_and_offset(
    clause: Option<LimitClause>,
) -> Result<(Option<u64>, Option<u64>), ParseError> {
    match clause {
        None => Ok((None, None)),
        Some(LimitClause::LimitOffset {
            limit,
            offset,
            limit_by,
        }) => {
            if !limit_by.is_empty() {
                return syntax("LIMIT BY is not supported");
            }
            let limit = limit.map(|e| count_literal(&e, "LIMIT")).transpose()?;
            let offset = offset
                .map(|o| count_literal(&o.value, "OFFSET"))
                .transpose()?;
            Ok((limit, offset))
        }
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => Ok((
            Some(count_literal(&limit, "LIMIT")?),
            Some(count_literal(&offset, "OFFSET")?),
        )),
    }
}

/// Parses `text` into a query shape bound to the dataset table `table_name`.
///
/// The query may name its table either as [`DATASET_PLACEHOLDER`] or by the
/// dataset's own physical name; anything else is rejected as unsafe.
pub fn parse_query(text: &str, table_name: &str) -> Result<QueryShape, ParseError> {
    screen_tokens(text)?;

    let dialect = GenericDialect {};
    let mut statements = Parser::new(&dialect)
        .with_recursion_limit(MAX_NESTING_DEPTH)
        .try_with_sql(text)?
        .parse_statements()?;

    let statement = match statements.len() {
        0 => return syntax("Query is empty"),
        1 => statements.remove(0),
        _ => return rejected("Multiple statements are not allowed"),
    };
    let Statement::Query(query) = statement else {
        return rejected("Only SELECT queries are allowed");
    };
    let Query {
        with,
        body,
        order_by,
        limit_clause,
        fetch,
        locks,
        for_clause,
        settings,
        format_clause,
        pipe_operators,
    } = *query;

    if with.is_some() {
        return rejected("WITH is not allowed");
    }
    let mut select = match *body {
        SetExpr::Select(select) => *select,
        SetExpr::SetOperation { .. } => return rejected("Set operations are not allowed"),
        _ => return rejected("Only a plain SELECT is allowed"),
    };
    if !locks.is_empty() {
        return rejected("Locking clauses are not allowed");
    }
    if fetch.is_some()
        || for_clause.is_some()
        || settings.is_some()
        || format_clause.is_some()
        || !pipe_operators.is_empty()
    {
        return syntax("Query uses a clause that is not supported");
    }

    reject_unsupported_clauses(&select)?;
    let qualifiers = bind_relation(&select, table_name)?;
    let mut rewriter = ExprRewriter::new(&qualifiers);

    for item in select.projection.iter_mut() {
        match item {
            SelectItem::UnnamedExpr(expr) => rewrite(expr, &mut rewriter)?,
            SelectItem::ExprWithAlias { expr, alias } => {
                rewrite(expr, &mut rewriter)?;
                *alias = fold_identifier(alias);
            }
            SelectItem::Wildcard(options) => {
                if *options != WildcardAdditionalOptions::default() {
                    rewriter.unsupported("Wildcard options are not supported".to_string());
                }
            }
            SelectItem::QualifiedWildcard(kind, options) => {
                let known = match kind {
                    SelectItemQualifiedWildcardKind::ObjectName(name) => {
                        matches!(name.0.as_slice(), [ObjectNamePart::Identifier(q)] if rewriter.knows(q))
                    }
                    SelectItemQualifiedWildcardKind::Expr(_) => false,
                };
                if !known {
                    return rejected(format!(
                        "Reference to {} is not allowed; only the dataset table may be used",
                        kind
                    ));
                }
                if *options != WildcardAdditionalOptions::default() {
                    rewriter.unsupported("Wildcard options are not supported".to_string());
                }
                *item = SelectItem::Wildcard(WildcardAdditionalOptions::default());
            }
        }
    }
    let aggregate_projection = rewriter.aggregates > 0;

    if let Some(selection) = select.selection.as_mut() {
        rewrite(selection, &mut rewriter)?;
    }
    let grouped = match &mut select.group_by {
        GroupByExpr::Expressions(exprs, _) => {
            for expr in exprs.iter_mut() {
                rewrite(expr, &mut rewriter)?;
            }
            !exprs.is_empty()
        }
        GroupByExpr::All(_) => true,
    };
    if let Some(having) = select.having.as_mut() {
        rewrite(having, &mut rewriter)?;
    }

    let mut order_items = Vec::new();
    if let Some(order_by) = order_by {
        if order_by.interpolate.is_some() {
            rewriter.unsupported("INTERPOLATE is not supported".to_string());
        }
        match order_by.kind {
            OrderByKind::Expressions(items) => order_items = items,
            OrderByKind::All(_) => {
                rewriter.unsupported("ORDER BY ALL is not supported".to_string())
            }
        }
    }
    for item in order_items.iter_mut() {
        if item.with_fill.is_some() {
            rewriter.unsupported("WITH FILL is not supported".to_string());
        }
        rewrite(&mut item.expr, &mut rewriter)?;
    }

    if let Some(message) = rewriter.first_unsupported {
        return syntax(message);
    }
    let (limit, offset) = limit_and_offset(limit_clause)?;

    let row_level = select.distinct.is_none()
        && !grouped
        && select.having.is_none()
        && !aggregate_projection;

    Ok(QueryShape::Select(SelectQuery {
        select,
        order_by: order_items,
        row_level,
        limit,
        offset,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "tbl_0123abcd";

    fn select(text: &str) -> SelectQuery {
        match parse_query(text, TABLE) {
            Ok(QueryShape::Select(query)) => query,
            Err(e) => panic!("failed to parse {text}: {e:?}"),
        }
    }

    fn is_unsafe(text: &str) -> bool {
        matches!(parse_query(text, TABLE), Err(ParseError::Unsafe(_)))
    }

    fn is_syntax(text: &str) -> bool {
        matches!(parse_query(text, TABLE), Err(ParseError::Syntax(_)))
    }

    #[test]
    fn rejects_modifications_multiple_statements_and_foreign_tables() {
        assert!(is_unsafe("DROP TABLE x"));
        assert!(is_unsafe("SELECT * FROM other_dataset_table"));
        assert!(is_unsafe("SELECT * FROM t; DELETE FROM t"));
        assert!(is_unsafe("SELECT * FROM dataset; SELECT * FROM dataset"));
        assert!(is_unsafe("delete from dataset"));
        assert!(is_unsafe("SELECT * INTO copy FROM dataset"));
        assert!(is_unsafe("SELECT * FROM dataset JOIN other ON true"));
        assert!(is_unsafe("SELECT * FROM dataset, other"));
        assert!(is_unsafe("SELECT * FROM public.dataset"));
        assert!(is_unsafe("SELECT * FROM (SELECT 1) AS x"));
        assert!(is_unsafe("SELECT a FROM dataset WHERE a IN (SELECT b FROM other)"));
        assert!(is_unsafe("SELECT a FROM dataset WHERE EXISTS (SELECT 1)"));
        assert!(is_unsafe("SELECT other.a FROM dataset"));
        assert!(is_unsafe("SELECT other.* FROM dataset"));
        assert!(is_unsafe("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(is_unsafe("SELECT a FROM dataset UNION SELECT a FROM other"));
        assert!(is_unsafe("SELECT * FROM read_csv('/etc/passwd')"));
    }

    #[test]
    fn unsafe_wins_over_unsupported_grammar() {
        assert!(is_unsafe(
            "SELECT nope(a) FROM dataset WHERE a IN (SELECT b FROM other)"
        ));
    }

    #[test]
    fn keywords_inside_literals_are_plain_data() {
        let query = select("SELECT * FROM dataset WHERE note = 'drop table; delete'");
        assert_eq!(
            query.render_core(TABLE),
            "SELECT * FROM \"tbl_0123abcd\" WHERE \"note\" = 'drop table; delete'"
        );
        assert!(parse_query("SELECT \"update\" FROM dataset", TABLE).is_ok());
    }

    #[test]
    fn syntax_errors_are_query_errors() {
        assert!(is_syntax(""));
        assert!(is_syntax(" ;; "));
        assert!(is_syntax("SELECT FROM dataset"));
        assert!(is_syntax("SELECT 1"));
        assert!(is_syntax("SELECT a FROM dataset WHERE (a > 1"));
        assert!(is_syntax("SELECT a FROM dataset LIMIT -1"));
        assert!(is_syntax("SELECT a FROM dataset LIMIT 1.5"));
        assert!(is_syntax("SELECT nope(a) FROM dataset"));
        assert!(is_syntax("SELECT SUM(a) OVER () FROM dataset"));
        assert!(is_syntax("SELECT 'open FROM dataset"));
    }

    #[test]
    fn deeply_nested_parentheses_are_rejected_without_overflowing() {
        for depth in [1000, 3000, 10000] {
            let text = format!(
                "SELECT * FROM dataset WHERE {}1{} = 1",
                "(".repeat(depth),
                ")".repeat(depth)
            );
            assert!(is_syntax(&text), "depth {depth} was not rejected");
        }
        assert!(parse_query("SELECT * FROM dataset WHERE ((((a)))) = 1", TABLE).is_ok());
    }

    #[test]
    fn accepts_placeholder_physical_name_and_alias() {
        assert!(parse_query("SELECT * FROM dataset", TABLE).is_ok());
        assert!(parse_query("select * from TBL_0123ABCD;", TABLE).is_ok());
        let query = select("SELECT d.price FROM dataset AS d WHERE d.price > 1");
        assert_eq!(
            query.render_core(TABLE),
            "SELECT \"price\" FROM \"tbl_0123abcd\" WHERE \"price\" > 1"
        );
        let query = select("SELECT d.* FROM dataset d");
        assert_eq!(query.render_core(TABLE), "SELECT * FROM \"tbl_0123abcd\"");
    }

    #[test]
    fn renders_full_shape_with_quoted_identifiers() {
        let query = select(
            "SELECT category, count(*) AS n, AVG(price) avg_price FROM dataset \
             WHERE price BETWEEN 1 AND 10 AND category NOT IN ('x', 'y') \
             GROUP BY category HAVING COUNT(*) > 1 ORDER BY n DESC NULLS LAST LIMIT 5 OFFSET 2",
        );
        assert_eq!(
            query.render_core(TABLE),
            "SELECT \"category\", COUNT(*) AS \"n\", AVG(\"price\") AS \"avg_price\" \
             FROM \"tbl_0123abcd\" WHERE \"price\" BETWEEN 1 AND 10 AND \
             \"category\" NOT IN ('x', 'y') GROUP BY \"category\" HAVING COUNT(*) > 1"
        );
        assert_eq!(
            query.render_order_by(Some("_row_id")),
            " ORDER BY \"n\" DESC NULLS LAST"
        );
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, Some(2));
        assert!(!query.is_row_level());
    }

    #[test]
    fn row_level_queries_fall_back_to_row_order() {
        let query = select("SELECT category, price FROM dataset WHERE price > 9");
        assert!(query.is_row_level());
        assert_eq!(
            query.render_order_by(Some("_row_id")),
            " ORDER BY \"_row_id\" ASC"
        );
        let distinct = select("SELECT DISTINCT category FROM dataset");
        assert_eq!(distinct.render_order_by(Some("_row_id")), "");
        let aggregate = select("SELECT MAX(price) FROM dataset");
        assert!(!aggregate.is_row_level());
    }

    #[test]
    fn nested_expressions_keep_their_grouping() {
        let query = select("SELECT * FROM dataset WHERE (a = 1 OR b = 2) AND NOT c IS NULL");
        assert_eq!(
            query.render_core(TABLE),
            "SELECT * FROM \"tbl_0123abcd\" WHERE (\"a\" = 1 OR \"b\" = 2) AND NOT \"c\" IS NULL"
        );
    }

    #[test]
    fn arithmetic_casts_and_string_escaping() {
        let query = select(
            "SELECT -price * 2 + 1 AS x, CAST(qty AS double), lower(name) FROM dataset \
             WHERE name LIKE 'O''Brien%' -- trailing comment",
        );
        assert_eq!(
            query.render_core(TABLE),
            "SELECT -\"price\" * 2 + 1 AS \"x\", CAST(\"qty\" AS DOUBLE), \
             LOWER(\"name\") FROM \"tbl_0123abcd\" WHERE \"name\" LIKE 'O''Brien%'"
        );
    }

    #[test]
    fn unquoted_identifiers_fold_to_lower_case() {
        let query = select("SELECT Price, \"Mixed Case\" FROM dataset");
        assert_eq!(
            query.render_core(TABLE),
            "SELECT \"price\", \"Mixed Case\" FROM \"tbl_0123abcd\""
        );
    }

    #[test]
    fn grammar_words_work_as_column_names() {
        let query = select("SELECT first, last, date FROM dataset ORDER BY first");
        assert_eq!(
            query.render_core(TABLE),
            "SELECT \"first\", \"last\", \"date\" FROM \"tbl_0123abcd\""
        );
        assert_eq!(query.render_order_by(None), " ORDER BY \"first\"");
    }
}
