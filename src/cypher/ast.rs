//! Cypher AST.
//!
//! These types represent parsed queries. They are pure data — no storage
//! references, no execution logic. A query is an ordered clause stream;
//! execution semantics (phases, strategies) are decided by the engine, not
//! encoded here.

use indexmap::IndexMap;

/// A complete query: an ordered list of clauses.
#[derive(Debug, Clone)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

/// One Cypher clause.
#[derive(Debug, Clone)]
pub enum Clause {
    Match(MatchClause),
    OptionalMatch(MatchClause),
    Create(CreateClause),
    Merge(MergeClause),
    Set(SetClause),
    Delete(DeleteClause),
    Remove(RemoveClause),
    With(ProjectionClause),
    Unwind(UnwindClause),
    Return(ProjectionClause),
    Call(CallClause),
    Union(UnionClause),
}

/// MATCH / OPTIONAL MATCH.
#[derive(Debug, Clone)]
pub struct MatchClause {
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<WhereCondition>,
}

/// CREATE. Comma-separated patterns and multi-hop chains are flattened into
/// single-hop segments by the parser.
#[derive(Debug, Clone)]
pub struct CreateClause {
    pub patterns: Vec<Pattern>,
}

/// MERGE with its ON CREATE SET / ON MATCH SET handlers.
#[derive(Debug, Clone)]
pub struct MergeClause {
    /// `MERGE p = (a)-[:R]->(b)` binds the whole chain as a path.
    pub path_variable: Option<String>,
    pub patterns: Vec<Pattern>,
    pub on_create: Vec<SetAssignment>,
    pub on_match: Vec<SetAssignment>,
}

/// SET.
#[derive(Debug, Clone)]
pub struct SetClause {
    pub items: Vec<SetAssignment>,
}

/// DELETE / DETACH DELETE. Targets are expressions so that list indexing
/// (`DELETE nodes[0]`) works, not just bare variables.
#[derive(Debug, Clone)]
pub struct DeleteClause {
    pub detach: bool,
    pub targets: Vec<Expression>,
}

/// REMOVE.
#[derive(Debug, Clone)]
pub struct RemoveClause {
    pub items: Vec<RemoveItem>,
}

#[derive(Debug, Clone)]
pub struct RemoveItem {
    pub variable: String,
    pub property: Option<String>,
    pub labels: Vec<String>,
}

/// UNWIND expr AS alias.
#[derive(Debug, Clone)]
pub struct UnwindClause {
    pub expr: Expression,
    pub alias: String,
}

/// WITH / RETURN share one shape: projection items, optional WHERE (HAVING
/// when any item aggregates), ordering and slicing.
#[derive(Debug, Clone)]
pub struct ProjectionClause {
    pub distinct: bool,
    /// `WITH *` / `RETURN *`: pass all incoming bindings through before
    /// applying the explicit items.
    pub star: bool,
    pub items: Vec<ProjectionItem>,
    pub where_clause: Option<WhereCondition>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expression>,
    pub limit: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct ProjectionItem {
    pub expr: Expression,
    pub alias: Option<String>,
}

impl ProjectionItem {
    /// Output column name: the alias, or a name derived from the expression.
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expr.default_name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub expr: Expression,
    pub ascending: bool,
}

/// CALL procedure(args) [YIELD cols]. Parsed but claimed by no execution
/// strategy.
#[derive(Debug, Clone)]
pub struct CallClause {
    pub procedure: String,
    pub args: Vec<Expression>,
    pub yields: Vec<String>,
}

/// UNION [ALL] separator between sub-queries. Parsed but claimed by no
/// execution strategy.
#[derive(Debug, Clone)]
pub struct UnionClause {
    pub all: bool,
}

// ============================================================================
// Patterns
// ============================================================================

/// A pattern is a single node or a single-hop relationship. The parser
/// decomposes `(a)-[r]->(b)-[s]->(c)` into segments sharing `b`.
#[derive(Debug, Clone)]
pub enum Pattern {
    Node(NodePattern),
    Relationship(RelationshipPattern),
}

impl Pattern {
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Pattern::Node(n) => n.variable.as_deref().into_iter().collect(),
            Pattern::Relationship(r) => r
                .source
                .variable
                .as_deref()
                .into_iter()
                .chain(r.edge.variable.as_deref())
                .chain(r.target.variable.as_deref())
                .collect(),
        }
    }
}

/// `(alias:Label1:Label2 {prop: value})`
#[derive(Debug, Clone, Default)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: IndexMap<String, Expression>,
}

/// `(source)-[edge]->(target)` (or `<-`, or undirected `-`).
#[derive(Debug, Clone)]
pub struct RelationshipPattern {
    pub source: NodePattern,
    pub edge: EdgeSpec,
    pub target: NodePattern,
}

/// The bracketed part of a relationship pattern.
#[derive(Debug, Clone, Default)]
pub struct EdgeSpec {
    pub variable: Option<String>,
    pub rel_type: Option<String>,
    pub direction: EdgeDirection,
    /// `*`, `*2`, `*1..3`. Execution supports only the bound
    /// relationship-list form (`-[rs*]->` with `rs` bound to an edge list).
    pub var_length: bool,
    pub min_hops: Option<u32>,
    pub max_hops: Option<u32>,
    pub properties: IndexMap<String, Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeDirection {
    #[default]
    Right,
    Left,
    Undirected,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Literal),
    /// `$name`
    Parameter(String),
    /// `n`
    Variable(String),
    /// `n.prop` — the common one-step form.
    Property { variable: String, key: String },
    /// Nested access on an arbitrary base: `(head(xs)).prop`, `m.a.b`.
    PropertyAccess { base: Box<Expression>, key: String },
    /// `xs[i]`; negative indices count from the end.
    IndexAccess { base: Box<Expression>, index: Box<Expression> },
    /// `[1, 2, 3]`
    List(Vec<Expression>),
    /// `{name: 'Ada', age: 3}`
    Object(IndexMap<String, Expression>),
    Unary { op: UnaryOp, operand: Box<Expression> },
    Binary { op: BinaryOp, left: Box<Expression>, right: Box<Expression> },
    Comparison { op: ComparisonOp, left: Box<Expression>, right: Box<Expression> },
    /// `name(args)`; `count(*)` is `count` with no args.
    Function { name: String, args: Vec<Expression>, distinct: bool },
    /// Searched CASE. Simple CASE is desugared to equality conditions by the
    /// parser.
    Case { whens: Vec<CaseWhen>, else_branch: Option<Box<Expression>> },
    /// `[x IN list WHERE cond | proj]`
    ListComprehension {
        variable: String,
        list: Box<Expression>,
        filter: Option<Box<WhereCondition>>,
        projection: Option<Box<Expression>>,
    },
    /// `ALL/ANY/NONE/SINGLE(x IN list WHERE cond)`
    ListPredicate(ListPredicate),
    /// `n:Person` used as a predicate.
    LabelPredicate { variable: String, labels: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct CaseWhen {
    pub condition: WhereCondition,
    pub result: Expression,
}

#[derive(Debug, Clone)]
pub struct ListPredicate {
    pub kind: ListPredicateKind,
    pub variable: String,
    pub list: Box<Expression>,
    pub condition: Box<WhereCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPredicateKind {
    All,
    Any,
    None,
    Single,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
}

// ============================================================================
// SET assignments
// ============================================================================

/// One SET item. Exactly one of the shapes is populated:
/// `n.prop = e` (property + value), `n = e` (`replace_props`),
/// `n += e` (`merge_props`), `n:Label:Other` (labels).
#[derive(Debug, Clone)]
pub struct SetAssignment {
    pub variable: String,
    pub property: Option<String>,
    pub labels: Vec<String>,
    pub value: Option<Expression>,
    pub replace_props: bool,
    pub merge_props: bool,
}

/// Conditions in WHERE, HAVING and CASE branches.
#[derive(Debug, Clone)]
pub enum WhereCondition {
    Comparison { op: ComparisonOp, left: Expression, right: Expression },
    And(Box<WhereCondition>, Box<WhereCondition>),
    Or(Box<WhereCondition>, Box<WhereCondition>),
    Not(Box<WhereCondition>),
    Expression(Expression),
    ListPredicate(ListPredicate),
}

// ============================================================================
// AST inspection helpers
// ============================================================================

const AGGREGATE_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];
const NONDETERMINISTIC_FUNCTIONS: &[&str] = &["rand", "randomuuid"];

pub fn is_aggregate_function(name: &str) -> bool {
    AGGREGATE_FUNCTIONS.iter().any(|f| name.eq_ignore_ascii_case(f))
}

impl Expression {
    /// Is this node itself an aggregate call?
    pub fn is_aggregate_call(&self) -> bool {
        matches!(self, Expression::Function { name, .. } if is_aggregate_function(name))
    }

    /// Does any sub-expression aggregate?
    pub fn contains_aggregate(&self) -> bool {
        self.any_function(&mut |name| is_aggregate_function(name))
    }

    /// Does any sub-expression call a non-deterministic function? List
    /// comprehension filters count.
    pub fn contains_nondeterministic(&self) -> bool {
        self.any_function(&mut |name| {
            NONDETERMINISTIC_FUNCTIONS.iter().any(|f| name.eq_ignore_ascii_case(f))
        })
    }

    fn any_function(&self, pred: &mut dyn FnMut(&str) -> bool) -> bool {
        match self {
            Expression::Function { name, args, .. } => {
                pred(name) || args.iter().any(|a| a.any_function(pred))
            }
            Expression::Unary { operand, .. } => operand.any_function(pred),
            Expression::Binary { left, right, .. }
            | Expression::Comparison { left, right, .. } => {
                left.any_function(pred) || right.any_function(pred)
            }
            Expression::PropertyAccess { base, .. } => base.any_function(pred),
            Expression::IndexAccess { base, index } => {
                base.any_function(pred) || index.any_function(pred)
            }
            Expression::List(items) => items.iter().any(|e| e.any_function(pred)),
            Expression::Object(entries) => entries.values().any(|e| e.any_function(pred)),
            Expression::Case { whens, else_branch } => {
                whens.iter().any(|w| {
                    w.condition.any_function(pred) || w.result.any_function(pred)
                }) || else_branch.as_ref().is_some_and(|e| e.any_function(pred))
            }
            Expression::ListComprehension { list, filter, projection, .. } => {
                list.any_function(pred)
                    || filter.as_ref().is_some_and(|f| f.any_function(pred))
                    || projection.as_ref().is_some_and(|p| p.any_function(pred))
            }
            Expression::ListPredicate(p) => {
                p.list.any_function(pred) || p.condition.any_function(pred)
            }
            _ => false,
        }
    }

    /// Free variables referenced by this expression. Comprehension and list
    /// predicate binders shadow their variable inside their own scope.
    pub fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expression::Variable(name) => out.push(name.clone()),
            Expression::Property { variable, .. } => out.push(variable.clone()),
            Expression::LabelPredicate { variable, .. } => out.push(variable.clone()),
            Expression::PropertyAccess { base, .. } => base.collect_variables(out),
            Expression::IndexAccess { base, index } => {
                base.collect_variables(out);
                index.collect_variables(out);
            }
            Expression::List(items) => {
                for item in items {
                    item.collect_variables(out);
                }
            }
            Expression::Object(entries) => {
                for value in entries.values() {
                    value.collect_variables(out);
                }
            }
            Expression::Unary { operand, .. } => operand.collect_variables(out),
            Expression::Binary { left, right, .. }
            | Expression::Comparison { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expression::Function { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
            Expression::Case { whens, else_branch } => {
                for when in whens {
                    when.condition.collect_variables(out);
                    when.result.collect_variables(out);
                }
                if let Some(e) = else_branch {
                    e.collect_variables(out);
                }
            }
            Expression::ListComprehension { variable, list, filter, projection } => {
                list.collect_variables(out);
                let mut inner = Vec::new();
                if let Some(f) = filter {
                    f.collect_variables(&mut inner);
                }
                if let Some(p) = projection {
                    p.collect_variables(&mut inner);
                }
                out.extend(inner.into_iter().filter(|v| v != variable));
            }
            Expression::ListPredicate(p) => {
                p.list.collect_variables(out);
                let mut inner = Vec::new();
                p.condition.collect_variables(&mut inner);
                out.extend(inner.into_iter().filter(|v| *v != p.variable));
            }
            Expression::Literal(_) | Expression::Parameter(_) => {}
        }
    }

    /// Column name for an unaliased projection of this expression.
    pub fn default_name(&self) -> String {
        match self {
            Expression::Variable(name) => name.clone(),
            Expression::Property { variable, key } => format!("{variable}.{key}"),
            Expression::PropertyAccess { base, key } => {
                format!("{}.{key}", base.default_name())
            }
            Expression::Function { name, args, .. } => {
                if args.is_empty() {
                    format!("{name}(*)")
                } else {
                    format!("{name}({})", args[0].default_name())
                }
            }
            Expression::Parameter(name) => format!("${name}"),
            _ => "expr".to_string(),
        }
    }
}

impl WhereCondition {
    pub fn any_function(&self, pred: &mut dyn FnMut(&str) -> bool) -> bool {
        match self {
            WhereCondition::Comparison { left, right, .. } => {
                left.any_function(pred) || right.any_function(pred)
            }
            WhereCondition::And(a, b) | WhereCondition::Or(a, b) => {
                a.any_function(pred) || b.any_function(pred)
            }
            WhereCondition::Not(inner) => inner.any_function(pred),
            WhereCondition::Expression(e) => e.any_function(pred),
            WhereCondition::ListPredicate(p) => {
                p.list.any_function(pred) || p.condition.any_function(pred)
            }
        }
    }

    pub fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            WhereCondition::Comparison { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            WhereCondition::And(a, b) | WhereCondition::Or(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            WhereCondition::Not(inner) => inner.collect_variables(out),
            WhereCondition::Expression(e) => e.collect_variables(out),
            WhereCondition::ListPredicate(p) => {
                p.list.collect_variables(out);
                let mut inner = Vec::new();
                p.condition.collect_variables(&mut inner);
                out.extend(inner.into_iter().filter(|v| *v != p.variable));
            }
        }
    }
}

impl ProjectionClause {
    /// Does any projection item aggregate?
    pub fn has_aggregate(&self) -> bool {
        self.items.iter().any(|item| item.expr.contains_aggregate())
    }
}
