//! Cypher recursive descent parser.
//!
//! Parses token streams into the clause-stream AST. Supports:
//! - MATCH / OPTIONAL MATCH with node and relationship patterns
//! - CREATE, MERGE (ON CREATE SET / ON MATCH SET), SET, DELETE / DETACH
//!   DELETE, REMOVE
//! - WITH / RETURN with DISTINCT, `*`, WHERE, ORDER BY, SKIP, LIMIT
//! - UNWIND, CALL ... YIELD, UNION [ALL]
//! - Full expression grammar with precedence, list comprehensions, list
//!   predicates (ALL/ANY/NONE/SINGLE), CASE (simple CASE is desugared)

use indexmap::IndexMap;

use super::ast::*;
use super::lexer::{locate, Token, TokenKind};
use crate::{Error, Result};

/// Parser state — wraps a token slice with a cursor. The source text is kept
/// for line/column resolution in errors.
struct Parser<'t> {
    src: &'t str,
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(src: &'t str, tokens: &'t [Token]) -> Self {
        Self { src, tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_ahead(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(self.error(format!("Expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> Error {
        let position = self.peek().span.start;
        let (line, column) = locate(self.src, position);
        Error::ParseError { message, position, line, column }
    }

    /// Names (variables, property keys, labels, function names) may collide
    /// with keywords (`n.type`, `n.order`); accept any word-shaped token.
    fn expect_name(&mut self) -> Result<String> {
        let kind = self.peek_kind();
        let word = matches!(kind, TokenKind::Identifier)
            || (!matches!(
                kind,
                TokenKind::Integer
                    | TokenKind::Float
                    | TokenKind::StringLiteral
                    | TokenKind::Parameter
                    | TokenKind::Eof
            ) && self.peek().text.chars().all(|c| c.is_alphanumeric() || c == '_')
                && !self.peek().text.is_empty());
        if word {
            Ok(self.advance().text.clone())
        } else {
            let tok = self.peek();
            Err(self.error(format!("Expected a name, got {:?} '{}'", tok.kind, tok.text)))
        }
    }
}

/// Parse a complete query from tokens.
pub fn parse_query(src: &str, tokens: &[Token]) -> Result<Query> {
    let mut p = Parser::new(src, tokens);
    let mut clauses = Vec::new();

    loop {
        match p.peek_kind() {
            TokenKind::Match => {
                p.advance();
                clauses.push(Clause::Match(parse_match_body(&mut p)?));
            }
            TokenKind::Optional => {
                p.advance();
                p.expect(TokenKind::Match)?;
                clauses.push(Clause::OptionalMatch(parse_match_body(&mut p)?));
            }
            TokenKind::Create => {
                p.advance();
                let patterns = parse_pattern_list(&mut p, false)?;
                clauses.push(Clause::Create(CreateClause { patterns }));
            }
            TokenKind::Merge => {
                p.advance();
                clauses.push(Clause::Merge(parse_merge_body(&mut p)?));
            }
            TokenKind::Set => {
                p.advance();
                clauses.push(Clause::Set(SetClause { items: parse_set_items(&mut p)? }));
            }
            TokenKind::Detach => {
                p.advance();
                p.expect(TokenKind::Delete)?;
                clauses.push(Clause::Delete(parse_delete_body(&mut p, true)?));
            }
            TokenKind::Delete => {
                p.advance();
                clauses.push(Clause::Delete(parse_delete_body(&mut p, false)?));
            }
            TokenKind::Remove => {
                p.advance();
                clauses.push(Clause::Remove(RemoveClause { items: parse_remove_items(&mut p)? }));
            }
            TokenKind::With => {
                p.advance();
                clauses.push(Clause::With(parse_projection_body(&mut p, true)?));
            }
            TokenKind::Unwind => {
                p.advance();
                let expr = parse_expr(&mut p)?;
                p.expect(TokenKind::As)?;
                let alias = p.expect_name()?;
                clauses.push(Clause::Unwind(UnwindClause { expr, alias }));
            }
            TokenKind::Return => {
                p.advance();
                clauses.push(Clause::Return(parse_projection_body(&mut p, false)?));
            }
            TokenKind::Call => {
                p.advance();
                clauses.push(Clause::Call(parse_call_body(&mut p)?));
            }
            TokenKind::Union => {
                p.advance();
                let all = p.eat(TokenKind::All);
                clauses.push(Clause::Union(UnionClause { all }));
            }
            TokenKind::Semicolon => {
                p.advance();
                break;
            }
            TokenKind::Eof => break,
            kind => {
                return Err(p.error(format!("Unexpected token {kind:?} at start of clause")));
            }
        }
    }

    if clauses.is_empty() {
        return Err(p.error("Empty query".into()));
    }
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!("Unexpected token after query: {:?}", p.peek_kind())));
    }

    Ok(Query { clauses })
}

// ============================================================================
// Clause bodies
// ============================================================================

fn parse_match_body(p: &mut Parser) -> Result<MatchClause> {
    let patterns = parse_pattern_list(p, false)?;
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_condition(p)?)
    } else {
        None
    };
    Ok(MatchClause { patterns, where_clause })
}

fn parse_merge_body(p: &mut Parser) -> Result<MergeClause> {
    // MERGE p = (a)-[:R]->(b)
    let path_variable = if p.at(TokenKind::Identifier) && p.peek_ahead(1) == TokenKind::Eq {
        let name = p.advance().text.clone();
        p.advance(); // =
        Some(name)
    } else {
        None
    };

    let patterns = parse_pattern_chain(p)?;

    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    while p.at(TokenKind::On) {
        p.advance();
        if p.eat(TokenKind::Create) {
            p.expect(TokenKind::Set)?;
            on_create.extend(parse_set_items(p)?);
        } else if p.eat(TokenKind::Match) {
            p.expect(TokenKind::Set)?;
            on_match.extend(parse_set_items(p)?);
        } else {
            return Err(p.error("Expected CREATE or MATCH after ON".into()));
        }
    }

    Ok(MergeClause { path_variable, patterns, on_create, on_match })
}

fn parse_delete_body(p: &mut Parser, detach: bool) -> Result<DeleteClause> {
    let mut targets = vec![parse_expr(p)?];
    while p.eat(TokenKind::Comma) {
        targets.push(parse_expr(p)?);
    }
    Ok(DeleteClause { detach, targets })
}

fn parse_remove_items(p: &mut Parser) -> Result<Vec<RemoveItem>> {
    let mut items = vec![parse_remove_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_remove_item(p)?);
    }
    Ok(items)
}

fn parse_remove_item(p: &mut Parser) -> Result<RemoveItem> {
    let variable = p.expect_name()?;
    if p.eat(TokenKind::Dot) {
        let property = p.expect_name()?;
        return Ok(RemoveItem { variable, property: Some(property), labels: Vec::new() });
    }
    let mut labels = Vec::new();
    while p.eat(TokenKind::Colon) {
        labels.push(p.expect_name()?);
    }
    if labels.is_empty() {
        return Err(p.error("REMOVE expects a property or label".into()));
    }
    Ok(RemoveItem { variable, property: None, labels })
}

fn parse_projection_body(p: &mut Parser, is_with: bool) -> Result<ProjectionClause> {
    let distinct = p.eat(TokenKind::Distinct);
    let mut star = false;
    let mut items = Vec::new();

    if p.at(TokenKind::Star) {
        p.advance();
        star = true;
        while p.eat(TokenKind::Comma) {
            items.push(parse_projection_item(p)?);
        }
    } else {
        items.push(parse_projection_item(p)?);
        while p.eat(TokenKind::Comma) {
            items.push(parse_projection_item(p)?);
        }
    }

    // WHERE may come directly after the items (common) or after the slicing
    // modifiers; accept both placements on WITH.
    let mut where_clause = if is_with && p.eat(TokenKind::Where) {
        Some(parse_condition(p)?)
    } else {
        None
    };

    let mut order_by = Vec::new();
    if p.eat(TokenKind::Order) {
        p.expect(TokenKind::By)?;
        order_by.push(parse_order_item(p)?);
        while p.eat(TokenKind::Comma) {
            order_by.push(parse_order_item(p)?);
        }
    }

    let skip = if p.eat(TokenKind::Skip) { Some(parse_expr(p)?) } else { None };
    let limit = if p.eat(TokenKind::Limit) { Some(parse_expr(p)?) } else { None };

    if is_with && where_clause.is_none() && p.eat(TokenKind::Where) {
        where_clause = Some(parse_condition(p)?);
    }

    Ok(ProjectionClause { distinct, star, items, where_clause, order_by, skip, limit })
}

fn parse_projection_item(p: &mut Parser) -> Result<ProjectionItem> {
    let expr = parse_expr(p)?;
    let alias = if p.eat(TokenKind::As) { Some(p.expect_name()?) } else { None };
    Ok(ProjectionItem { expr, alias })
}

fn parse_order_item(p: &mut Parser) -> Result<OrderItem> {
    let expr = parse_expr(p)?;
    let ascending = if p.eat(TokenKind::Desc) {
        false
    } else {
        p.eat(TokenKind::Asc);
        true
    };
    Ok(OrderItem { expr, ascending })
}

fn parse_call_body(p: &mut Parser) -> Result<CallClause> {
    let mut procedure = p.expect_name()?;
    while p.eat(TokenKind::Dot) {
        procedure.push('.');
        procedure.push_str(&p.expect_name()?);
    }

    let mut args = Vec::new();
    if p.eat(TokenKind::LParen) {
        if !p.at(TokenKind::RParen) {
            args.push(parse_expr(p)?);
            while p.eat(TokenKind::Comma) {
                args.push(parse_expr(p)?);
            }
        }
        p.expect(TokenKind::RParen)?;
    }

    let mut yields = Vec::new();
    if p.eat(TokenKind::Yield) {
        yields.push(p.expect_name()?);
        while p.eat(TokenKind::Comma) {
            yields.push(p.expect_name()?);
        }
    }

    Ok(CallClause { procedure, args, yields })
}

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetAssignment>> {
    let mut items = vec![parse_set_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_set_item(p)?);
    }
    Ok(items)
}

fn parse_set_item(p: &mut Parser) -> Result<SetAssignment> {
    let variable = p.expect_name()?;

    // SET n.prop = expr
    if p.eat(TokenKind::Dot) {
        let property = p.expect_name()?;
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        return Ok(SetAssignment {
            variable,
            property: Some(property),
            labels: Vec::new(),
            value: Some(value),
            replace_props: false,
            merge_props: false,
        });
    }

    // SET n:Label:Other
    if p.at(TokenKind::Colon) {
        let mut labels = Vec::new();
        while p.eat(TokenKind::Colon) {
            labels.push(p.expect_name()?);
        }
        return Ok(SetAssignment {
            variable,
            property: None,
            labels,
            value: None,
            replace_props: false,
            merge_props: false,
        });
    }

    // SET n += {map} / SET n = {map}
    let merge_props = p.at(TokenKind::PlusEq);
    if merge_props {
        p.advance();
    } else {
        p.expect(TokenKind::Eq)?;
    }
    let value = parse_expr(p)?;
    Ok(SetAssignment {
        variable,
        property: None,
        labels: Vec::new(),
        value: Some(value),
        replace_props: !merge_props,
        merge_props,
    })
}

// ============================================================================
// Patterns
// ============================================================================

fn parse_pattern_list(p: &mut Parser, _in_merge: bool) -> Result<Vec<Pattern>> {
    if p.at(TokenKind::Identifier) && p.peek_ahead(1) == TokenKind::Eq {
        return Err(p.error("Named paths are supported in MERGE only".into()));
    }
    let mut patterns = parse_pattern_chain(p)?;
    while p.eat(TokenKind::Comma) {
        patterns.extend(parse_pattern_chain(p)?);
    }
    Ok(patterns)
}

/// Parse one comma-free pattern, decomposing a multi-hop chain
/// `(a)-[r]->(b)-[s]->(c)` into single-hop segments that share nodes.
/// Anonymous middle nodes are given internal `__anon*` names so the
/// segments stay connected; those bindings never reach `RETURN *`.
fn parse_pattern_chain(p: &mut Parser) -> Result<Vec<Pattern>> {
    let first = parse_node_pattern(p)?;

    if !p.at(TokenKind::Dash) && !p.at(TokenKind::LeftArrow) {
        return Ok(vec![Pattern::Node(first)]);
    }

    let mut segments = Vec::new();
    let mut source = first;
    let mut anon = 0usize;
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        let edge = parse_edge_spec(p)?;
        let mut target = parse_node_pattern(p)?;
        let chain_continues = p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow);
        if chain_continues && target.variable.is_none() {
            target.variable = Some(format!("__anon{anon}"));
            anon += 1;
        }
        // Later segments re-reference the shared node by variable alone.
        let next_source = NodePattern {
            variable: target.variable.clone(),
            labels: Vec::new(),
            properties: IndexMap::new(),
        };
        segments.push(Pattern::Relationship(RelationshipPattern { source, edge, target }));
        source = next_source;
    }
    Ok(segments)
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let mut variable = None;
    let mut labels = Vec::new();
    let mut properties = IndexMap::new();

    if p.at(TokenKind::Identifier) {
        variable = Some(p.advance().text.clone());
    }

    while p.at(TokenKind::Colon) {
        p.advance();
        labels.push(p.expect_name()?);
    }

    if p.at(TokenKind::LBrace) {
        properties = parse_map_literal_inner(p)?;
    }

    p.expect(TokenKind::RParen)?;
    Ok(NodePattern { variable, labels, properties })
}

fn parse_edge_spec(p: &mut Parser) -> Result<EdgeSpec> {
    // <-[...]- or -[...]-> or -[...]-
    let left_arrow = p.eat(TokenKind::LeftArrow);
    if !left_arrow {
        p.expect(TokenKind::Dash)?;
    }

    let mut spec = EdgeSpec::default();

    if p.at(TokenKind::LBracket) {
        p.advance();

        if p.at(TokenKind::Identifier) {
            spec.variable = Some(p.advance().text.clone());
        }

        if p.eat(TokenKind::Colon) {
            spec.rel_type = Some(p.expect_name()?);
        }

        // Variable length: * / *n / *min..max
        if p.eat(TokenKind::Star) {
            spec.var_length = true;
            if p.at(TokenKind::Integer) {
                let n = p.advance().text.parse::<u32>().ok();
                spec.min_hops = n;
                if p.eat(TokenKind::DotDot) {
                    if p.at(TokenKind::Integer) {
                        spec.max_hops = p.advance().text.parse::<u32>().ok();
                    }
                } else {
                    spec.max_hops = n;
                }
            } else if p.eat(TokenKind::DotDot) && p.at(TokenKind::Integer) {
                spec.max_hops = p.advance().text.parse::<u32>().ok();
            }
        }

        if p.at(TokenKind::LBrace) {
            spec.properties = parse_map_literal_inner(p)?;
        }

        p.expect(TokenKind::RBracket)?;
    }

    spec.direction = if left_arrow {
        p.expect(TokenKind::Dash)?;
        EdgeDirection::Left
    } else if p.eat(TokenKind::Arrow) {
        EdgeDirection::Right
    } else {
        p.expect(TokenKind::Dash)?;
        EdgeDirection::Undirected
    };

    Ok(spec)
}

// ============================================================================
// Conditions
// ============================================================================

/// Parse a boolean condition (WHERE, HAVING, CASE WHEN) by parsing the
/// expression grammar and lifting the boolean structure.
fn parse_condition(p: &mut Parser) -> Result<WhereCondition> {
    let expr = parse_expr(p)?;
    Ok(expr_to_condition(expr))
}

fn expr_to_condition(expr: Expression) -> WhereCondition {
    match expr {
        Expression::Binary { op: BinaryOp::And, left, right } => WhereCondition::And(
            Box::new(expr_to_condition(*left)),
            Box::new(expr_to_condition(*right)),
        ),
        Expression::Binary { op: BinaryOp::Or, left, right } => WhereCondition::Or(
            Box::new(expr_to_condition(*left)),
            Box::new(expr_to_condition(*right)),
        ),
        Expression::Unary { op: UnaryOp::Not, operand } => {
            WhereCondition::Not(Box::new(expr_to_condition(*operand)))
        }
        Expression::Comparison { op, left, right } => {
            WhereCondition::Comparison { op, left: *left, right: *right }
        }
        Expression::ListPredicate(pred) => WhereCondition::ListPredicate(pred),
        other => WhereCondition::Expression(other),
    }
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expression> {
    parse_or_expr(p)
}

fn parse_or_expr(p: &mut Parser) -> Result<Expression> {
    let mut left = parse_xor_expr(p)?;
    while p.eat(TokenKind::Or) {
        let right = parse_xor_expr(p)?;
        left = Expression::Binary { op: BinaryOp::Or, left: Box::new(left), right: Box::new(right) };
    }
    Ok(left)
}

fn parse_xor_expr(p: &mut Parser) -> Result<Expression> {
    let mut left = parse_and_expr(p)?;
    while p.eat(TokenKind::Xor) {
        let right = parse_and_expr(p)?;
        left = Expression::Binary { op: BinaryOp::Xor, left: Box::new(left), right: Box::new(right) };
    }
    Ok(left)
}

fn parse_and_expr(p: &mut Parser) -> Result<Expression> {
    let mut left = parse_not_expr(p)?;
    while p.eat(TokenKind::And) {
        let right = parse_not_expr(p)?;
        left = Expression::Binary { op: BinaryOp::And, left: Box::new(left), right: Box::new(right) };
    }
    Ok(left)
}

fn parse_not_expr(p: &mut Parser) -> Result<Expression> {
    if p.eat(TokenKind::Not) {
        let operand = parse_not_expr(p)?;
        Ok(Expression::Unary { op: UnaryOp::Not, operand: Box::new(operand) })
    } else {
        parse_comparison(p)
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expression> {
    let left = parse_addition(p)?;

    // IS NULL / IS NOT NULL
    if p.at(TokenKind::Is) {
        p.advance();
        let negated = p.eat(TokenKind::Not);
        p.expect(TokenKind::Null)?;
        let op = if negated { UnaryOp::IsNotNull } else { UnaryOp::IsNull };
        return Ok(Expression::Unary { op, operand: Box::new(left) });
    }

    let op = match p.peek_kind() {
        TokenKind::Eq => Some(ComparisonOp::Eq),
        TokenKind::Neq => Some(ComparisonOp::Neq),
        TokenKind::Lt => Some(ComparisonOp::Lt),
        TokenKind::Lte => Some(ComparisonOp::Lte),
        TokenKind::Gt => Some(ComparisonOp::Gt),
        TokenKind::Gte => Some(ComparisonOp::Gte),
        TokenKind::In => Some(ComparisonOp::In),
        TokenKind::Contains => Some(ComparisonOp::Contains),
        TokenKind::RegexMatch => Some(ComparisonOp::Matches),
        _ => None,
    };
    if let Some(op) = op {
        p.advance();
        let right = parse_addition(p)?;
        return Ok(Expression::Comparison { op, left: Box::new(left), right: Box::new(right) });
    }

    // STARTS WITH / ENDS WITH
    if p.at(TokenKind::Starts) {
        p.advance();
        p.expect(TokenKind::With)?;
        let right = parse_addition(p)?;
        return Ok(Expression::Comparison {
            op: ComparisonOp::StartsWith,
            left: Box::new(left),
            right: Box::new(right),
        });
    }
    if p.at(TokenKind::Ends) {
        p.advance();
        p.expect(TokenKind::With)?;
        let right = parse_addition(p)?;
        return Ok(Expression::Comparison {
            op: ComparisonOp::EndsWith,
            left: Box::new(left),
            right: Box::new(right),
        });
    }

    Ok(left)
}

fn parse_addition(p: &mut Parser) -> Result<Expression> {
    let mut left = parse_multiplication(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Subtract,
            _ => break,
        };
        p.advance();
        let right = parse_multiplication(p)?;
        left = Expression::Binary { op, left: Box::new(left), right: Box::new(right) };
    }
    Ok(left)
}

fn parse_multiplication(p: &mut Parser) -> Result<Expression> {
    let mut left = parse_power(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Multiply,
            TokenKind::Slash => BinaryOp::Divide,
            TokenKind::Percent => BinaryOp::Modulo,
            _ => break,
        };
        p.advance();
        let right = parse_power(p)?;
        left = Expression::Binary { op, left: Box::new(left), right: Box::new(right) };
    }
    Ok(left)
}

fn parse_power(p: &mut Parser) -> Result<Expression> {
    let left = parse_unary(p)?;
    if p.eat(TokenKind::Caret) {
        let right = parse_power(p)?; // right-associative
        Ok(Expression::Binary {
            op: BinaryOp::Power,
            left: Box::new(left),
            right: Box::new(right),
        })
    } else {
        Ok(left)
    }
}

fn parse_unary(p: &mut Parser) -> Result<Expression> {
    if p.eat(TokenKind::Dash) {
        let operand = parse_postfix(p)?;
        Ok(Expression::Unary { op: UnaryOp::Minus, operand: Box::new(operand) })
    } else {
        parse_postfix(p)
    }
}

/// Postfix chain: property access, index access, label predicate.
fn parse_postfix(p: &mut Parser) -> Result<Expression> {
    let mut expr = parse_primary(p)?;

    loop {
        if p.at(TokenKind::Dot) {
            p.advance();
            let key = p.expect_name()?;
            expr = match expr {
                Expression::Variable(variable) => Expression::Property { variable, key },
                base => Expression::PropertyAccess { base: Box::new(base), key },
            };
        } else if p.at(TokenKind::LBracket) {
            p.advance();
            let index = parse_expr(p)?;
            p.expect(TokenKind::RBracket)?;
            expr = Expression::IndexAccess { base: Box::new(expr), index: Box::new(index) };
        } else {
            break;
        }
    }

    // Label predicate: n:Person (only on a bare variable)
    if p.at(TokenKind::Colon) {
        if let Expression::Variable(variable) = &expr {
            let variable = variable.clone();
            let mut labels = Vec::new();
            while p.eat(TokenKind::Colon) {
                labels.push(p.expect_name()?);
            }
            expr = Expression::LabelPredicate { variable, labels };
        }
    }

    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expression> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let tok = p.advance();
            let text = tok.text.clone();
            let position = tok.span.start;
            let val = text.parse::<i64>().map_err(|_| {
                let (line, column) = locate(p.src, position);
                Error::ParseError { message: "Invalid integer".into(), position, line, column }
            })?;
            Ok(Expression::Literal(Literal::Int(val)))
        }
        TokenKind::Float => {
            let tok = p.advance();
            let text = tok.text.clone();
            let position = tok.span.start;
            let val = text.parse::<f64>().map_err(|_| {
                let (line, column) = locate(p.src, position);
                Error::ParseError { message: "Invalid float".into(), position, line, column }
            })?;
            Ok(Expression::Literal(Literal::Float(val)))
        }
        TokenKind::StringLiteral => {
            let tok = p.advance();
            Ok(Expression::Literal(Literal::String(tok.text.clone())))
        }
        TokenKind::True => {
            p.advance();
            Ok(Expression::Literal(Literal::Bool(true)))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expression::Literal(Literal::Bool(false)))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expression::Literal(Literal::Null))
        }
        TokenKind::Parameter => {
            let tok = p.advance();
            Ok(Expression::Parameter(tok.text.clone()))
        }

        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }

        // List literal or list comprehension
        TokenKind::LBracket => {
            p.advance();
            // [x IN list ...] is a comprehension
            if p.at(TokenKind::Identifier) && p.peek_ahead(1) == TokenKind::In {
                let variable = p.advance().text.clone();
                p.advance(); // IN
                let list = parse_expr(p)?;
                let filter = if p.eat(TokenKind::Where) {
                    Some(Box::new(parse_condition(p)?))
                } else {
                    None
                };
                let projection = if p.eat(TokenKind::Pipe) {
                    Some(Box::new(parse_expr(p)?))
                } else {
                    None
                };
                p.expect(TokenKind::RBracket)?;
                return Ok(Expression::ListComprehension {
                    variable,
                    list: Box::new(list),
                    filter,
                    projection,
                });
            }
            let mut items = Vec::new();
            if !p.at(TokenKind::RBracket) {
                items.push(parse_expr(p)?);
                while p.eat(TokenKind::Comma) {
                    items.push(parse_expr(p)?);
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expression::List(items))
        }

        TokenKind::LBrace => {
            let entries = parse_map_literal_inner(p)?;
            Ok(Expression::Object(entries))
        }

        TokenKind::Case => {
            p.advance();
            // Simple CASE is desugared to equality conditions on the operand.
            let operand = if !p.at(TokenKind::When) { Some(parse_expr(p)?) } else { None };
            let mut whens = Vec::new();
            while p.eat(TokenKind::When) {
                let condition = match &operand {
                    Some(op) => {
                        let value = parse_expr(p)?;
                        WhereCondition::Comparison {
                            op: ComparisonOp::Eq,
                            left: op.clone(),
                            right: value,
                        }
                    }
                    None => parse_condition(p)?,
                };
                p.expect(TokenKind::Then)?;
                let result = parse_expr(p)?;
                whens.push(CaseWhen { condition, result });
            }
            let else_branch = if p.eat(TokenKind::Else) {
                Some(Box::new(parse_expr(p)?))
            } else {
                None
            };
            p.expect(TokenKind::End)?;
            Ok(Expression::Case { whens, else_branch })
        }

        // List predicates: ALL/ANY/NONE/SINGLE (x IN list WHERE cond)
        TokenKind::All | TokenKind::Any | TokenKind::NoneKw | TokenKind::Single => {
            let kind = match p.advance().kind {
                TokenKind::All => ListPredicateKind::All,
                TokenKind::Any => ListPredicateKind::Any,
                TokenKind::NoneKw => ListPredicateKind::None,
                _ => ListPredicateKind::Single,
            };
            p.expect(TokenKind::LParen)?;
            let variable = p.expect_name()?;
            p.expect(TokenKind::In)?;
            let list = parse_expr(p)?;
            p.expect(TokenKind::Where)?;
            let condition = parse_condition(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(Expression::ListPredicate(ListPredicate {
                kind,
                variable,
                list: Box::new(list),
                condition: Box::new(condition),
            }))
        }

        // Identifier — variable or function call
        TokenKind::Identifier => {
            let tok = p.advance().clone();
            if p.at(TokenKind::LParen) {
                p.advance();
                let mut args = Vec::new();
                let distinct = p.eat(TokenKind::Distinct);
                if p.at(TokenKind::Star) {
                    // count(*)
                    p.advance();
                } else if !p.at(TokenKind::RParen) {
                    args.push(parse_expr(p)?);
                    while p.eat(TokenKind::Comma) {
                        args.push(parse_expr(p)?);
                    }
                }
                p.expect(TokenKind::RParen)?;
                Ok(Expression::Function { name: tok.text, args, distinct })
            } else {
                Ok(Expression::Variable(tok.text))
            }
        }

        kind => Err(p.error(format!("Unexpected token in expression: {:?} '{}'", kind, p.peek().text))),
    }
}

fn parse_map_literal_inner(p: &mut Parser) -> Result<IndexMap<String, Expression>> {
    p.expect(TokenKind::LBrace)?;
    let mut map = IndexMap::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.expect_name()?;
            p.expect(TokenKind::Colon)?;
            let value = parse_expr(p)?;
            map.insert(key, value);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(map)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::lexer::tokenize;

    fn parse(query: &str) -> Result<Query> {
        let tokens = tokenize(query)?;
        parse_query(query, &tokens)
    }

    #[test]
    fn simple_match_return() {
        let q = parse("MATCH (n:Person) RETURN n").unwrap();
        assert_eq!(q.clauses.len(), 2);
        match &q.clauses[0] {
            Clause::Match(m) => {
                assert_eq!(m.patterns.len(), 1);
                assert!(m.where_clause.is_none());
            }
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn match_with_where() {
        let q = parse("MATCH (n:Person) WHERE n.age > 30 RETURN n.name").unwrap();
        match &q.clauses[0] {
            Clause::Match(m) => {
                assert!(matches!(
                    m.where_clause,
                    Some(WhereCondition::Comparison { op: ComparisonOp::Gt, .. })
                ));
            }
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn chain_decomposes_into_segments() {
        let q = parse("MATCH (a)-[r]->(b)<-[s:KNOWS]-(c) RETURN a").unwrap();
        match &q.clauses[0] {
            Clause::Match(m) => {
                assert_eq!(m.patterns.len(), 2);
                match &m.patterns[1] {
                    Pattern::Relationship(rel) => {
                        assert_eq!(rel.source.variable.as_deref(), Some("b"));
                        assert_eq!(rel.edge.direction, EdgeDirection::Left);
                        assert_eq!(rel.edge.rel_type.as_deref(), Some("KNOWS"));
                        assert_eq!(rel.target.variable.as_deref(), Some("c"));
                    }
                    other => panic!("expected relationship, got {other:?}"),
                }
            }
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn merge_with_handlers() {
        let q = parse(
            "MERGE (n:Counter {name: 'hits'}) \
             ON CREATE SET n.count = 1 ON MATCH SET n.count = n.count + 1",
        )
        .unwrap();
        match &q.clauses[0] {
            Clause::Merge(m) => {
                assert_eq!(m.on_create.len(), 1);
                assert_eq!(m.on_match.len(), 1);
                assert!(m.path_variable.is_none());
            }
            other => panic!("expected MERGE, got {other:?}"),
        }
    }

    #[test]
    fn merge_named_path() {
        let q = parse("MERGE p = (a:X)-[:R]->(b:Y) RETURN p").unwrap();
        match &q.clauses[0] {
            Clause::Merge(m) => {
                assert_eq!(m.path_variable.as_deref(), Some("p"));
                assert_eq!(m.patterns.len(), 1);
            }
            other => panic!("expected MERGE, got {other:?}"),
        }
    }

    #[test]
    fn unwind_create() {
        let q = parse("UNWIND [1,2,3] AS x CREATE (n:N {v: x})").unwrap();
        assert!(matches!(q.clauses[0], Clause::Unwind(_)));
        assert!(matches!(q.clauses[1], Clause::Create(_)));
    }

    #[test]
    fn with_aggregate_and_slicing() {
        let q = parse("MATCH (n) WITH n.age AS age ORDER BY age DESC SKIP 1 LIMIT 2 RETURN age")
            .unwrap();
        match &q.clauses[1] {
            Clause::With(w) => {
                assert_eq!(w.order_by.len(), 1);
                assert!(!w.order_by[0].ascending);
                assert!(w.skip.is_some());
                assert!(w.limit.is_some());
            }
            other => panic!("expected WITH, got {other:?}"),
        }
    }

    #[test]
    fn list_comprehension() {
        let q = parse("RETURN [x IN [1,2,3] WHERE x > 1 | x * 10] AS ys").unwrap();
        match &q.clauses[0] {
            Clause::Return(r) => match &r.items[0].expr {
                Expression::ListComprehension { variable, filter, projection, .. } => {
                    assert_eq!(variable, "x");
                    assert!(filter.is_some());
                    assert!(projection.is_some());
                }
                other => panic!("expected comprehension, got {other:?}"),
            },
            other => panic!("expected RETURN, got {other:?}"),
        }
    }

    #[test]
    fn list_predicate() {
        let q = parse("RETURN all(x IN [1,2] WHERE x > 0) AS ok").unwrap();
        match &q.clauses[0] {
            Clause::Return(r) => match &r.items[0].expr {
                Expression::ListPredicate(pred) => {
                    assert_eq!(pred.kind, ListPredicateKind::All);
                }
                other => panic!("expected list predicate, got {other:?}"),
            },
            other => panic!("expected RETURN, got {other:?}"),
        }
    }

    #[test]
    fn detach_delete_with_index() {
        let q = parse("MATCH (n:N) WITH collect(n) AS ns DETACH DELETE ns[-1]").unwrap();
        match &q.clauses[2] {
            Clause::Delete(d) => {
                assert!(d.detach);
                assert!(matches!(d.targets[0], Expression::IndexAccess { .. }));
            }
            other => panic!("expected DELETE, got {other:?}"),
        }
    }

    #[test]
    fn simple_case_desugars() {
        let q = parse("RETURN CASE 1 WHEN 1 THEN 'a' ELSE 'b' END AS r").unwrap();
        match &q.clauses[0] {
            Clause::Return(r) => match &r.items[0].expr {
                Expression::Case { whens, else_branch } => {
                    assert_eq!(whens.len(), 1);
                    assert!(else_branch.is_some());
                    assert!(matches!(
                        whens[0].condition,
                        WhereCondition::Comparison { op: ComparisonOp::Eq, .. }
                    ));
                }
                other => panic!("expected CASE, got {other:?}"),
            },
            other => panic!("expected RETURN, got {other:?}"),
        }
    }

    #[test]
    fn set_forms() {
        let q = parse("MATCH (n) SET n.a = 1, n += {b: 2}, n:Label").unwrap();
        match &q.clauses[1] {
            Clause::Set(s) => {
                assert_eq!(s.items.len(), 3);
                assert_eq!(s.items[0].property.as_deref(), Some("a"));
                assert!(s.items[1].merge_props);
                assert_eq!(s.items[2].labels, vec!["Label".to_string()]);
            }
            other => panic!("expected SET, got {other:?}"),
        }
    }

    #[test]
    fn keyword_property_names() {
        let q = parse("MATCH (n) RETURN n.type AS t, n.order AS o").unwrap();
        assert!(matches!(q.clauses[1], Clause::Return(_)));
    }

    #[test]
    fn error_carries_position() {
        let err = parse("MATCH (n RETURN n").unwrap_err();
        match err {
            Error::ParseError { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 1);
            }
            other => panic!("expected ParseError, got {other:?}"),
        }
    }
}
