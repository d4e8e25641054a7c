//! Matcher expression parser and evaluator.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!` (short-circuiting)
//! - Membership: `r.act in ("GET", "HEAD")`, `r.ip in r.ctx.allowed`
//! - Field access: `r.sub`, `p.obj`, attribute paths on request values `r.sub.Age`
//! - Function calls: `keyMatch2(r.obj, p.obj)`, `g(r.sub, p.sub)`
//! - Literals: integers and floats (optionally negative), `"strings"`, `'strings'`, `true`, `false`
//! - Parentheses for grouping
//!
//! Parsing yields a syntax tree ([`Expr`]); the model compiler resolves it into
//! a [`Node`] tree that is evaluated once per policy rule without re-parsing.

use std::borrow::Cow;

use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::functions::{Function, MatchOptions};

// ─── Syntax tree ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    Path(Vec<String>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,  // ==
    Ne,  // !=
    Gt,  // >
    Lt,  // <
    Ge,  // >=
    Le,  // <=
    And, // &&
    Or,  // ||
    Not, // !
    In,  // in
}

fn tokenize(input: &str) -> Result<Vec<Token>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let next = chars.get(i + 1).copied();
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            quote @ ('"' | '\'') => {
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(AuthzError::InvalidMatcher(
                        "unterminated string literal".into(),
                    ));
                }
                tokens.push(Token::Str(s));
                i += 1; // closing quote
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                if num_str.contains('.') {
                    let f: f64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidMatcher(format!("invalid float `{num_str}`"))
                    })?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidMatcher(format!("invalid integer `{num_str}`"))
                    })?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(AuthzError::InvalidMatcher(format!(
                    "unexpected character `{c}`"
                )));
            }
        }
    }
    Ok(tokens)
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect_rparen(&mut self) -> Result<(), AuthzError> {
        if self.advance() != Some(Token::RParen) {
            return Err(AuthzError::InvalidMatcher(
                "expected closing parenthesis `)`".into(),
            ));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, AuthzError> {
        self.parse_or()
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// comparison = unary (("==" | "!=" | ">" | "<" | ">=" | "<=" | "in") unary)?
    fn parse_comparison(&mut self) -> Result<Expr, AuthzError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Le) => BinOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_unary()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::UnaryNot(Box::new(expr)));
        }
        self.parse_primary()
    }

    /// primary = literal | call | path | "(" expr ("," expr)* ")"
    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Int(n)))
            }
            Some(Token::Float(f)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Float(f)))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Str(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(false)))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { name, args });
                }
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => {
                            return Err(AuthzError::InvalidMatcher(
                                "expected identifier after `.`".into(),
                            ));
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Token::LParen) => {
                self.advance();
                let first = self.parse_expr()?;
                if self.peek() != Some(&Token::Comma) {
                    self.expect_rparen()?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.peek() == Some(&Token::Comma) {
                    self.advance();
                    items.push(self.parse_expr()?);
                }
                self.expect_rparen()?;
                Ok(Expr::Tuple(items))
            }
            other => Err(AuthzError::InvalidMatcher(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }

    /// args = ")" | expr ("," expr)* ")"
    fn parse_args(&mut self) -> Result<Vec<Expr>, AuthzError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => {
                    return Err(AuthzError::InvalidMatcher(
                        "expected `,` or `)` in argument list".into(),
                    ))
                }
            }
        }
    }
}

/// Parse a matcher expression string into a syntax tree.
pub fn parse_matcher(input: &str) -> Result<Expr, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AuthzError::InvalidMatcher("empty expression".into()));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(AuthzError::InvalidMatcher(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

// ─── Compiled tree ──────────────────────────────────────────────────────

/// A matcher with every name resolved to a field index, function, or role graph.
#[derive(Debug, Clone)]
pub enum Node {
    Literal(LitValue),
    /// Request field, optionally followed by an attribute path.
    Request {
        index: usize,
        path: Vec<String>,
    },
    Policy {
        index: usize,
    },
    BinOp {
        op: BinOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Not(Box<Node>),
    In {
        element: Box<Node>,
        collection: Box<Node>,
    },
    Tuple(Vec<Node>),
    Call {
        function: Function,
        args: Vec<Node>,
    },
    /// Role predicate over role definition `role_type` (0 = `g`, 1 = `g2`, ...).
    Role {
        role_type: usize,
        args: Vec<Node>,
    },
}

/// Role membership as seen by the evaluator.
pub trait RoleLookup {
    fn has_link(&self, role_type: usize, name: &str, role: &str, domain: Option<&str>) -> bool;
}

/// Values bound for one evaluation of the matcher against one policy rule.
pub struct Scope<'a> {
    pub request: &'a [Value],
    pub policy: &'a [String],
    pub roles: &'a dyn RoleLookup,
    pub options: MatchOptions,
}

// ─── Evaluator ──────────────────────────────────────────────────────────

static NULL: Value = Value::Null;

/// Evaluate a compiled matcher. The result must be a boolean.
pub fn evaluate(node: &Node, scope: &Scope<'_>) -> Result<bool, AuthzError> {
    match eval_value(node, scope)? {
        EvalResult::Bool(b) => Ok(b),
        other => Err(AuthzError::Evaluation(format!(
            "matcher must evaluate to boolean, got: {other:?}"
        ))),
    }
}

#[derive(Debug, Clone)]
enum EvalResult<'a> {
    Int(i64),
    Float(f64),
    Str(Cow<'a, str>),
    Bool(bool),
    Array(Vec<EvalResult<'a>>),
    Null,
}

impl EvalResult<'_> {
    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalResult::Int(n) => Some(*n as f64),
            EvalResult::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn equals(&self, other: &Self, options: &MatchOptions) -> bool {
        match (self, other) {
            (EvalResult::Int(a), EvalResult::Int(b)) => a == b,
            (EvalResult::Float(a), EvalResult::Float(b)) => a == b,
            (EvalResult::Int(a), EvalResult::Float(b)) => (*a as f64) == *b,
            (EvalResult::Float(a), EvalResult::Int(b)) => *a == (*b as f64),
            (EvalResult::Str(a), EvalResult::Str(b)) => options.str_eq(a, b),
            (EvalResult::Bool(a), EvalResult::Bool(b)) => a == b,
            (EvalResult::Array(a), EvalResult::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y, options))
            }
            (EvalResult::Null, EvalResult::Null) => true,
            _ => false,
        }
    }
}

fn eval_value<'a>(node: &Node, scope: &Scope<'a>) -> Result<EvalResult<'a>, AuthzError> {
    match node {
        Node::Literal(lit) => Ok(match lit {
            LitValue::Int(n) => EvalResult::Int(*n),
            LitValue::Float(f) => EvalResult::Float(*f),
            LitValue::Str(s) => EvalResult::Str(Cow::Owned(s.clone())),
            LitValue::Bool(b) => EvalResult::Bool(*b),
        }),
        Node::Request { index, path } => {
            let mut current = scope.request.get(*index).unwrap_or(&NULL);
            for seg in path {
                current = current.get(seg).unwrap_or(&NULL);
            }
            Ok(json_to_eval(current))
        }
        Node::Policy { index } => match scope.policy.get(*index) {
            Some(v) => Ok(EvalResult::Str(Cow::Borrowed(v.as_str()))),
            None => Ok(EvalResult::Null),
        },
        Node::Not(inner) => match eval_value(inner, scope)? {
            EvalResult::Bool(b) => Ok(EvalResult::Bool(!b)),
            _ => Err(AuthzError::Evaluation(
                "`!` operator requires a boolean operand".into(),
            )),
        },
        Node::Tuple(items) => {
            let values = items
                .iter()
                .map(|item| eval_value(item, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EvalResult::Array(values))
        }
        Node::In {
            element,
            collection,
        } => {
            let elem = eval_value(element, scope)?;
            match eval_value(collection, scope)? {
                EvalResult::Array(items) => Ok(EvalResult::Bool(
                    items.iter().any(|item| item.equals(&elem, &scope.options)),
                )),
                _ => Err(AuthzError::Evaluation(
                    "`in` operator requires a tuple or array on the right side".into(),
                )),
            }
        }
        Node::Call { function, args } => {
            let values = eval_args(&function.name, args, scope)?;
            let strs: Vec<&str> = values.iter().map(|v| v.as_ref()).collect();
            Ok(EvalResult::Bool((function.call)(&strs)?))
        }
        Node::Role { role_type, args } => {
            let values = eval_args("g", args, scope)?;
            let domain = values.get(2).map(|d| d.as_ref());
            Ok(EvalResult::Bool(scope.roles.has_link(
                *role_type,
                &values[0],
                &values[1],
                domain,
            )))
        }
        Node::BinOp { op, left, right } => eval_binop(*op, left, right, scope),
    }
}

fn eval_args<'a>(
    name: &str,
    args: &[Node],
    scope: &Scope<'a>,
) -> Result<Vec<Cow<'a, str>>, AuthzError> {
    args.iter()
        .map(|arg| match eval_value(arg, scope)? {
            EvalResult::Str(s) => Ok(s),
            other => Err(AuthzError::Evaluation(format!(
                "function `{name}` expects string arguments, got: {other:?}"
            ))),
        })
        .collect()
}

fn eval_binop<'a>(
    op: BinOp,
    left: &Node,
    right: &Node,
    scope: &Scope<'a>,
) -> Result<EvalResult<'a>, AuthzError> {
    if let BinOp::And | BinOp::Or = op {
        let symbol = if op == BinOp::And { "&&" } else { "||" };
        let l = match eval_value(left, scope)? {
            EvalResult::Bool(b) => b,
            _ => {
                return Err(AuthzError::Evaluation(format!(
                    "`{symbol}` requires boolean operands"
                )))
            }
        };
        // Short-circuit.
        if (op == BinOp::And && !l) || (op == BinOp::Or && l) {
            return Ok(EvalResult::Bool(l));
        }
        return match eval_value(right, scope)? {
            EvalResult::Bool(r) => Ok(EvalResult::Bool(r)),
            _ => Err(AuthzError::Evaluation(format!(
                "`{symbol}` requires boolean operands"
            ))),
        };
    }

    let l = eval_value(left, scope)?;
    let r = eval_value(right, scope)?;
    match op {
        BinOp::Eq => Ok(EvalResult::Bool(l.equals(&r, &scope.options))),
        BinOp::Ne => Ok(EvalResult::Bool(!l.equals(&r, &scope.options))),
        _ => {
            let (lf, rf) = match (l.as_f64(), r.as_f64()) {
                (Some(lf), Some(rf)) => (lf, rf),
                _ => {
                    return Err(AuthzError::Evaluation(
                        "comparison operator requires numeric operands".into(),
                    ))
                }
            };
            let result = match op {
                BinOp::Gt => lf > rf,
                BinOp::Lt => lf < rf,
                BinOp::Ge => lf >= rf,
                _ => lf <= rf,
            };
            Ok(EvalResult::Bool(result))
        }
    }
}

fn json_to_eval(value: &Value) -> EvalResult<'_> {
    match value {
        Value::Null => EvalResult::Null,
        Value::Bool(b) => EvalResult::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvalResult::Int(i)
            } else if let Some(f) = n.as_f64() {
                EvalResult::Float(f)
            } else {
                EvalResult::Null
            }
        }
        Value::String(s) => EvalResult::Str(Cow::Borrowed(s.as_str())),
        Value::Array(arr) => EvalResult::Array(arr.iter().map(json_to_eval).collect()),
        Value::Object(_) => EvalResult::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoRoles;

    impl RoleLookup for NoRoles {
        fn has_link(&self, _: usize, name: &str, role: &str, _: Option<&str>) -> bool {
            name == role
        }
    }

    fn scope<'a>(request: &'a [Value], policy: &'a [String]) -> Scope<'a> {
        Scope {
            request,
            policy,
            roles: &NoRoles,
            options: MatchOptions::default(),
        }
    }

    #[test]
    fn test_parse_simple_comparison() {
        let expr = parse_matcher("r.sub == p.sub").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(Expr::Path(vec!["r".into(), "sub".into()])),
                right: Box::new(Expr::Path(vec!["p".into(), "sub".into()])),
            }
        );
    }

    #[test]
    fn test_parse_call() {
        let expr = parse_matcher("g(r.sub, p.sub, r.dom)").unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "g");
                assert_eq!(args.len(), 3);
            }
            _ => panic!("expected Call"),
        }
        assert!(matches!(
            parse_matcher("noArgs()").unwrap(),
            Expr::Call { args, .. } if args.is_empty()
        ));
    }

    #[test]
    fn test_parse_in_tuple() {
        let expr = parse_matcher("r.act in ('GET', \"HEAD\")").unwrap();
        match expr {
            Expr::In { collection, .. } => match *collection {
                Expr::Tuple(items) => assert_eq!(items.len(), 2),
                _ => panic!("expected Tuple"),
            },
            _ => panic!("expected In"),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_matcher("a == 1 || b == 2 && c == 3").unwrap();
        match expr {
            Expr::BinOp {
                op: BinOp::Or,
                right,
                ..
            } => assert!(matches!(*right, Expr::BinOp { op: BinOp::And, .. })),
            _ => panic!("expected Or at the root"),
        }
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = parse_matcher("(a || b) && c").unwrap();
        match expr {
            Expr::BinOp {
                op: BinOp::And,
                left,
                ..
            } => assert!(matches!(*left, Expr::BinOp { op: BinOp::Or, .. })),
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn test_parse_negative_numbers() {
        let expr = parse_matcher("r.sub.Balance > -1").unwrap();
        match expr {
            Expr::BinOp { op: BinOp::Gt, right, .. } => {
                assert_eq!(*right, Expr::Literal(LitValue::Int(-1)))
            }
            _ => panic!("expected Gt"),
        }
        assert!(matches!(
            parse_matcher("x >= -2.5").unwrap(),
            Expr::BinOp { right, .. } if *right == Expr::Literal(LitValue::Float(-2.5))
        ));
        // A lone minus is still not an operator.
        assert!(parse_matcher("a - b").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_matcher("").is_err());
        assert!(parse_matcher(r#""hello"#).is_err());
        assert!(parse_matcher("r.sub ==").is_err());
        assert!(parse_matcher("r.sub == p.sub)").is_err());
        assert!(parse_matcher("f(a b)").is_err());
        assert!(parse_matcher("r.sub = p.sub").is_err());
        assert!(parse_matcher("r. == x").is_err());
    }

    #[test]
    fn test_evaluate_fields() {
        let node = Node::BinOp {
            op: BinOp::Eq,
            left: Box::new(Node::Request {
                index: 0,
                path: vec![],
            }),
            right: Box::new(Node::Policy { index: 0 }),
        };
        let request = [json!("alice")];
        assert!(evaluate(&node, &scope(&request, &["alice".to_string()])).unwrap());
        assert!(!evaluate(&node, &scope(&request, &["bob".to_string()])).unwrap());
    }

    #[test]
    fn test_evaluate_attribute_path() {
        let node = Node::BinOp {
            op: BinOp::Ge,
            left: Box::new(Node::Request {
                index: 0,
                path: vec!["age".into()],
            }),
            right: Box::new(Node::Literal(LitValue::Int(18))),
        };
        let adult = [json!({ "name": "alice", "age": 30 })];
        let minor = [json!({ "name": "tim", "age": 12 })];
        assert!(evaluate(&node, &scope(&adult, &[])).unwrap());
        assert!(!evaluate(&node, &scope(&minor, &[])).unwrap());

        // Missing attribute is null, which is not numeric.
        let missing = [json!({ "name": "x" })];
        assert!(matches!(
            evaluate(&node, &scope(&missing, &[])),
            Err(AuthzError::Evaluation(_))
        ));
    }

    #[test]
    fn test_evaluate_in_tuple() {
        let node = Node::In {
            element: Box::new(Node::Request {
                index: 0,
                path: vec![],
            }),
            collection: Box::new(Node::Tuple(vec![
                Node::Literal(LitValue::Str("GET".into())),
                Node::Literal(LitValue::Str("HEAD".into())),
            ])),
        };
        assert!(evaluate(&node, &scope(&[json!("HEAD")], &[])).unwrap());
        assert!(!evaluate(&node, &scope(&[json!("POST")], &[])).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_type_error() {
        // Right side would be a type error, but is never evaluated.
        let node = Node::BinOp {
            op: BinOp::And,
            left: Box::new(Node::Literal(LitValue::Bool(false))),
            right: Box::new(Node::Literal(LitValue::Int(1))),
        };
        assert!(!evaluate(&node, &scope(&[], &[])).unwrap());
    }

    #[test]
    fn test_type_errors() {
        let not_bool = Node::Literal(LitValue::Str("x".into()));
        assert!(matches!(
            evaluate(&not_bool, &scope(&[], &[])),
            Err(AuthzError::Evaluation(_))
        ));

        let bad_and = Node::BinOp {
            op: BinOp::And,
            left: Box::new(Node::Literal(LitValue::Bool(true))),
            right: Box::new(Node::Literal(LitValue::Int(1))),
        };
        assert!(evaluate(&bad_and, &scope(&[], &[])).is_err());

        let bad_not = Node::Not(Box::new(Node::Literal(LitValue::Int(1))));
        assert!(evaluate(&bad_not, &scope(&[], &[])).is_err());
    }

    #[test]
    fn test_case_insensitive_equality() {
        let node = Node::BinOp {
            op: BinOp::Eq,
            left: Box::new(Node::Request {
                index: 0,
                path: vec![],
            }),
            right: Box::new(Node::Policy { index: 0 }),
        };
        let request = [json!("ALICE")];
        let policy = ["alice".to_string()];
        let mut s = scope(&request, &policy);
        assert!(!evaluate(&node, &s).unwrap());
        s.options.case_sensitive = false;
        assert!(evaluate(&node, &s).unwrap());
    }
}
