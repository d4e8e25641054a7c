//! Model compiler: section-based model text to an executable [`CompiledModel`].
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act, eft
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow)) && !some(where (p.eft == deny))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && r.act == p.act
//! ```
//!
//! Compilation resolves every name in the matcher up front: fields become
//! indices into the request and rule tuples, function calls are bound to the
//! registry, and `g`/`g2`/... are bound to role definitions. Anything that
//! cannot be resolved is a compile error.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::authz::errors::AuthzError;
use crate::authz::functions::FunctionRegistry;
use crate::authz::matcher::{parse_matcher, Expr, Node};

const REQUEST_SECTION: &str = "request_definition";
const POLICY_SECTION: &str = "policy_definition";
const ROLE_SECTION: &str = "role_definition";
const EFFECT_SECTION: &str = "policy_effect";
const MATCHER_SECTION: &str = "matchers";

const EFT_FIELD: &str = "eft";
const PRIORITY_FIELD: &str = "priority";

/// How per-rule matches combine into one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// `some(where (p.eft == allow))`
    AllowOverride,
    /// `some(where (p.eft == allow)) && !some(where (p.eft == deny))`
    DenyOverride,
    /// `!some(where (p.eft == deny))`
    AllowUnlessDenied,
    /// `priority(p.eft) || deny`
    Priority,
}

impl FromStr for Effect {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "some(where(p.eft==allow))" => Ok(Effect::AllowOverride),
            "some(where(p.eft==allow))&&!some(where(p.eft==deny))" => Ok(Effect::DenyOverride),
            "!some(where(p.eft==deny))" => Ok(Effect::AllowUnlessDenied),
            "priority(p.eft)||deny" => Ok(Effect::Priority),
            _ => Err(AuthzError::UnsupportedEffect(s.trim().to_string())),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Effect::AllowOverride => "some(where (p.eft == allow))",
            Effect::DenyOverride => "some(where (p.eft == allow)) && !some(where (p.eft == deny))",
            Effect::AllowUnlessDenied => "!some(where (p.eft == deny))",
            Effect::Priority => "priority(p.eft) || deny",
        };
        f.write_str(text)
    }
}

/// A `[role_definition]` entry such as `g = _, _` or `g2 = _, _, _`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    pub name: String,
    /// Third value of each assignment is a domain.
    pub with_domain: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledModel {
    request_fields: Vec<String>,
    policy_fields: Vec<String>,
    role_definitions: Vec<RoleDefinition>,
    effect: Effect,
    matcher: Node,
    matcher_text: String,
    eft_index: Option<usize>,
    priority_index: Option<usize>,
}

impl CompiledModel {
    pub fn compile(text: &str, registry: &FunctionRegistry) -> Result<Self, AuthzError> {
        let sections = Sections::parse(text)?;

        let request_text = sections.request.ok_or_else(|| missing(REQUEST_SECTION, "r"))?;
        let policy_text = sections.policy.ok_or_else(|| missing(POLICY_SECTION, "p"))?;
        let effect_text = sections.effect.ok_or_else(|| missing(EFFECT_SECTION, "e"))?;
        let matcher_text = sections.matcher.ok_or_else(|| missing(MATCHER_SECTION, "m"))?;

        let request_fields = parse_fields("r", &request_text)?;
        let policy_fields = parse_fields("p", &policy_text)?;
        let role_definitions = sections
            .roles
            .iter()
            .map(|(name, value)| parse_role_definition(name, value))
            .collect::<Result<Vec<_>, _>>()?;
        let effect: Effect = effect_text.parse()?;

        let eft_index = policy_fields.iter().position(|f| f == EFT_FIELD);
        let priority_index = policy_fields.iter().position(|f| f == PRIORITY_FIELD);
        if effect != Effect::AllowOverride && eft_index.is_none() {
            tracing::warn!(
                effect = %effect,
                "policy effect can deny but [policy_definition] has no `eft` field; every rule is an allow"
            );
        }

        let expr = parse_matcher(&matcher_text)?;
        let resolver = Resolver {
            request: &request_fields,
            policy: &policy_fields,
            roles: &role_definitions,
            registry,
        };
        let matcher = resolver.resolve(&expr)?;

        tracing::info!(
            request_fields = request_fields.len(),
            policy_fields = policy_fields.len(),
            role_definitions = role_definitions.len(),
            effect = %effect,
            "Compiled access-control model"
        );

        Ok(Self {
            request_fields,
            policy_fields,
            role_definitions,
            effect,
            matcher,
            matcher_text,
            eft_index,
            priority_index,
        })
    }

    pub fn from_file(path: &Path, registry: &FunctionRegistry) -> Result<Self, AuthzError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::InvalidModel(format!("cannot read model file `{}`: {e}", path.display()))
        })?;
        Self::compile(&text, registry)
    }

    pub fn request_fields(&self) -> &[String] {
        &self.request_fields
    }

    pub fn policy_fields(&self) -> &[String] {
        &self.policy_fields
    }

    pub fn role_definitions(&self) -> &[RoleDefinition] {
        &self.role_definitions
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn matcher(&self) -> &Node {
        &self.matcher
    }

    pub fn matcher_text(&self) -> &str {
        &self.matcher_text
    }

    pub fn eft_index(&self) -> Option<usize> {
        self.eft_index
    }

    pub fn priority_index(&self) -> Option<usize> {
        self.priority_index
    }
}

fn missing(section: &str, key: &str) -> AuthzError {
    AuthzError::InvalidModel(format!("missing `{key}` in [{section}]"))
}

// ─── Section text ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Sections {
    request: Option<String>,
    policy: Option<String>,
    roles: Vec<(String, String)>,
    effect: Option<String>,
    matcher: Option<String>,
}

impl Sections {
    fn parse(text: &str) -> Result<Self, AuthzError> {
        let mut sections = Sections::default();
        let mut current: Option<String> = None;

        for line in logical_lines(text) {
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim();
                match name {
                    REQUEST_SECTION | POLICY_SECTION | ROLE_SECTION | EFFECT_SECTION
                    | MATCHER_SECTION => current = Some(name.to_string()),
                    _ => {
                        return Err(AuthzError::InvalidModel(format!(
                            "unknown section [{name}]"
                        )))
                    }
                }
                continue;
            }

            let Some(section) = current.as_deref() else {
                return Err(AuthzError::InvalidModel(format!(
                    "`{line}` appears before any section header"
                )));
            };
            let (key, value) = line.split_once('=').ok_or_else(|| {
                AuthzError::InvalidModel(format!("expected `key = value` in [{section}], got `{line}`"))
            })?;
            let key = key.trim();
            let value = value.trim().to_string();

            let slot = match (section, key) {
                (REQUEST_SECTION, "r") => &mut sections.request,
                (POLICY_SECTION, "p") => &mut sections.policy,
                (EFFECT_SECTION, "e") => &mut sections.effect,
                (MATCHER_SECTION, "m") => &mut sections.matcher,
                (ROLE_SECTION, k) if is_role_key(k) => {
                    if sections.roles.iter().any(|(name, _)| name == k) {
                        return Err(duplicate(section, key));
                    }
                    sections.roles.push((k.to_string(), value));
                    continue;
                }
                _ => {
                    return Err(AuthzError::InvalidModel(format!(
                        "unknown key `{key}` in [{section}]"
                    )))
                }
            };
            if slot.is_some() {
                return Err(duplicate(section, key));
            }
            *slot = Some(value);
        }
        Ok(sections)
    }
}

fn duplicate(section: &str, key: &str) -> AuthzError {
    AuthzError::InvalidModel(format!("duplicate key `{key}` in [{section}]"))
}

/// `g`, `g2`, `g3`, ...
fn is_role_key(key: &str) -> bool {
    key.strip_prefix('g')
        .map(|rest| rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Trimmed, non-comment lines with `\` continuations joined.
fn logical_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = String::new();
    for raw in text.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        match line.strip_suffix('\\') {
            Some(head) => {
                pending.push_str(head.trim_end());
                pending.push(' ');
            }
            None => {
                pending.push_str(line);
                out.push(pending.trim().to_string());
                pending.clear();
            }
        }
    }
    if !pending.trim().is_empty() {
        out.push(pending.trim().to_string());
    }
    out
}

fn parse_fields(key: &str, value: &str) -> Result<Vec<String>, AuthzError> {
    let mut fields: Vec<String> = Vec::new();
    for field in value.split(',').map(str::trim) {
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AuthzError::InvalidModel(format!(
                "`{key}` has an invalid field name `{field}`"
            )));
        }
        if fields.iter().any(|f| f == field) {
            return Err(AuthzError::InvalidModel(format!(
                "`{key}` declares field `{field}` twice"
            )));
        }
        fields.push(field.to_string());
    }
    Ok(fields)
}

fn parse_role_definition(name: &str, value: &str) -> Result<RoleDefinition, AuthzError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if !parts.iter().all(|p| *p == "_") || !(2..=3).contains(&parts.len()) {
        return Err(AuthzError::InvalidModel(format!(
            "role definition `{name} = {value}` must be `_, _` or `_, _, _`"
        )));
    }
    Ok(RoleDefinition {
        name: name.to_string(),
        with_domain: parts.len() == 3,
    })
}

// ─── Name resolution ────────────────────────────────────────────────────

struct Resolver<'a> {
    request: &'a [String],
    policy: &'a [String],
    roles: &'a [RoleDefinition],
    registry: &'a FunctionRegistry,
}

impl Resolver<'_> {
    fn resolve(&self, expr: &Expr) -> Result<Node, AuthzError> {
        Ok(match expr {
            Expr::Literal(lit) => Node::Literal(lit.clone()),
            Expr::Path(segments) => self.resolve_path(segments)?,
            Expr::BinOp { op, left, right } => Node::BinOp {
                op: *op,
                left: Box::new(self.resolve(left)?),
                right: Box::new(self.resolve(right)?),
            },
            Expr::UnaryNot(inner) => Node::Not(Box::new(self.resolve(inner)?)),
            Expr::In {
                element,
                collection,
            } => Node::In {
                element: Box::new(self.resolve(element)?),
                collection: Box::new(self.resolve(collection)?),
            },
            Expr::Tuple(items) => Node::Tuple(self.resolve_all(items)?),
            Expr::Call { name, args } => self.resolve_call(name, args)?,
        })
    }

    fn resolve_all(&self, exprs: &[Expr]) -> Result<Vec<Node>, AuthzError> {
        exprs.iter().map(|e| self.resolve(e)).collect()
    }

    fn resolve_path(&self, segments: &[String]) -> Result<Node, AuthzError> {
        let dotted = segments.join(".");
        match segments {
            [root, field, rest @ ..] if root == "r" => {
                let index = position(self.request, field)
                    .ok_or_else(|| AuthzError::UndeclaredField(dotted.clone()))?;
                Ok(Node::Request {
                    index,
                    path: rest.to_vec(),
                })
            }
            [root, field] if root == "p" => {
                let index = position(self.policy, field)
                    .ok_or_else(|| AuthzError::UndeclaredField(dotted.clone()))?;
                Ok(Node::Policy { index })
            }
            [root, _, _, ..] if root == "p" => Err(AuthzError::InvalidMatcher(format!(
                "`{dotted}`: policy values are strings and have no attributes"
            ))),
            [single] => Err(AuthzError::InvalidMatcher(format!(
                "bare identifier `{single}`; fields are referenced as r.<field> or p.<field>"
            ))),
            _ => Err(AuthzError::UndeclaredField(dotted)),
        }
    }

    fn resolve_call(&self, name: &str, args: &[Expr]) -> Result<Node, AuthzError> {
        if let Some(role_type) = self.roles.iter().position(|r| r.name == name) {
            let expected = if self.roles[role_type].with_domain { 3 } else { 2 };
            check_call_arity(name, expected, args.len())?;
            return Ok(Node::Role {
                role_type,
                args: self.resolve_all(args)?,
            });
        }

        let function = self
            .registry
            .get(name)
            .ok_or_else(|| AuthzError::UnknownFunction(name.to_string()))?;
        check_call_arity(name, function.arity, args.len())?;
        Ok(Node::Call {
            function: function.clone(),
            args: self.resolve_all(args)?,
        })
    }
}

fn position(fields: &[String], name: &str) -> Option<usize> {
    fields.iter().position(|f| f == name)
}

fn check_call_arity(name: &str, expected: usize, actual: usize) -> Result<(), AuthzError> {
    if expected != actual {
        return Err(AuthzError::FunctionArity {
            name: name.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
