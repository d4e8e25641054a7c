//! Function registry for matcher expressions.
//!
//! Every function a matcher calls is resolved against a [`FunctionRegistry`]
//! when the model is compiled, so an unknown name fails at compile time rather
//! than on the request path. Built-ins:
//!
//! - `keyMatch(key, pattern)`: `/foo/*` matches everything under `/foo/`
//! - `keyMatch2(key, pattern)`: `/foo/:id` matches one path segment, `*` matches any run
//! - `keyMatch3(key, pattern)`: `/foo/{id}` matches one path segment, `*` matches any run
//! - `regexMatch(key, pattern)`: unanchored regular expression search
//! - `globMatch(key, pattern)`: glob or prefix/suffix wildcard, see [`PatternMode`]
//!
//! Role predicates (`g`, `g2`, ...) are not registered here; the model compiler
//! binds them to role graphs directly.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::authz::errors::AuthzError;

const REGEX_CACHE_LIMIT: usize = 1024;

/// How `globMatch` interprets its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    /// `*` any run of characters, `?` one character, `[a-z]` / `[!x]` classes.
    #[default]
    Glob,
    /// Only a leading and/or trailing `*` is special; everything else is literal.
    Affix,
}

/// String comparison behavior shared by operators and built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub pattern_mode: PatternMode,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            pattern_mode: PatternMode::Glob,
        }
    }
}

impl MatchOptions {
    pub fn str_eq(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.chars()
                .flat_map(char::to_lowercase)
                .eq(b.chars().flat_map(char::to_lowercase))
        }
    }

    fn fold<'a>(&self, s: &'a str) -> Cow<'a, str> {
        if self.case_sensitive {
            Cow::Borrowed(s)
        } else {
            Cow::Owned(s.to_lowercase())
        }
    }
}

/// A pure predicate over string arguments.
pub type PredicateFn = Arc<dyn Fn(&[&str]) -> Result<bool, AuthzError> + Send + Sync>;

#[derive(Clone)]
pub struct Function {
    pub name: String,
    pub arity: usize,
    pub call: PredicateFn,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
    options: MatchOptions,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new(MatchOptions::default())
    }
}

impl FunctionRegistry {
    /// Registry holding the built-in functions configured with `options`.
    pub fn new(options: MatchOptions) -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
            options,
        };
        let cache = Arc::new(RegexCache::default());

        registry.insert("keyMatch", 2, move |args| {
            Ok(key_match(&options.fold(args[0]), &options.fold(args[1])))
        });

        let c = cache.clone();
        registry.insert("keyMatch2", 2, move |args| {
            let pattern = key_pattern_to_regex(args[1], ':');
            c.is_match(&pattern, args[0], options.case_sensitive)
        });

        let c = cache.clone();
        registry.insert("keyMatch3", 2, move |args| {
            let pattern = key_pattern_to_regex(args[1], '{');
            c.is_match(&pattern, args[0], options.case_sensitive)
        });

        let c = cache.clone();
        registry.insert("regexMatch", 2, move |args| {
            c.is_match(args[1], args[0], options.case_sensitive)
        });

        let c = cache;
        registry.insert("globMatch", 2, move |args| match options.pattern_mode {
            PatternMode::Glob => {
                let pattern = glob_to_regex(args[1]);
                c.is_match(&pattern, args[0], options.case_sensitive)
            }
            PatternMode::Affix => Ok(affix_match(
                &options.fold(args[0]),
                &options.fold(args[1]),
            )),
        });

        registry
    }

    /// Register a caller-supplied predicate. Replaces any function of the same name.
    pub fn register<F>(&mut self, name: &str, arity: usize, f: F)
    where
        F: Fn(&[&str]) -> bool + Send + Sync + 'static,
    {
        self.insert(name, arity, move |args| Ok(f(args)));
    }

    fn insert<F>(&mut self, name: &str, arity: usize, f: F)
    where
        F: Fn(&[&str]) -> Result<bool, AuthzError> + Send + Sync + 'static,
    {
        self.functions.insert(
            name.to_string(),
            Function {
                name: name.to_string(),
                arity,
                call: Arc::new(f),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }
}

/// Compiled regexes keyed by (pattern, case sensitivity).
#[derive(Default)]
struct RegexCache {
    entries: RwLock<HashMap<(String, bool), Regex>>,
}

impl RegexCache {
    fn is_match(&self, pattern: &str, text: &str, case_sensitive: bool) -> Result<bool, AuthzError> {
        let key = (pattern.to_string(), case_sensitive);
        if let Some(re) = self.entries.read().get(&key) {
            return Ok(re.is_match(text));
        }

        let re = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| AuthzError::Evaluation(format!("invalid regex `{pattern}`: {e}")))?;
        let matched = re.is_match(text);

        let mut entries = self.entries.write();
        if entries.len() >= REGEX_CACHE_LIMIT {
            entries.clear();
        }
        entries.insert(key, re);
        Ok(matched)
    }
}

/// `/foo/*` matches `/foo/` and anything below it; without `*` the key must be equal.
pub fn key_match(key: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        None => key == pattern,
        Some(i) => {
            let prefix = &pattern[..i];
            key.len() >= i && key.starts_with(prefix)
        }
    }
}

/// Translate a keyMatch2 (`:id`) or keyMatch3 (`{id}`) pattern into an anchored regex.
fn key_pattern_to_regex(pattern: &str, style: char) -> String {
    let mut out = String::from("^");
    for (i, segment) in pattern.split('/').enumerate() {
        if i > 0 {
            out.push('/');
        }
        if segment == "*" {
            out.push_str(".*");
            continue;
        }
        if style == ':' {
            if segment.starts_with(':') && segment.len() > 1 {
                out.push_str("[^/]+");
            } else {
                out.push_str(&escape_with_star(segment));
            }
            continue;
        }
        let mut rest = segment;
        while let Some(open) = rest.find('{') {
            match rest[open..].find('}') {
                Some(close) => {
                    out.push_str(&escape_with_star(&rest[..open]));
                    out.push_str("[^/]+");
                    rest = &rest[open + close + 1..];
                }
                None => break,
            }
        }
        out.push_str(&escape_with_star(rest));
    }
    out.push('$');
    out
}

fn escape_with_star(literal: &str) -> String {
    literal
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

/// Translate a glob into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match glob_class(&chars[i + 1..]) {
                Some((class, consumed)) => {
                    out.push_str(&class);
                    i += consumed;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Regex for the class whose body starts at `rest` (just past `[`), and how
/// many chars it used. `None` when there is no closing `]` or the class is
/// empty (`[]`, `[!]`); the `[` is then literal.
fn glob_class(rest: &[char]) -> Option<(String, usize)> {
    let close = rest.iter().position(|c| *c == ']')?;
    let (negated, body) = match rest[..close].split_first() {
        Some(('!', body)) => (true, body),
        _ => (false, &rest[..close]),
    };
    if body.is_empty() {
        return None;
    }

    let mut out = String::from(if negated { "[^" } else { "[" });
    for (j, &c) in body.iter().enumerate() {
        // `&&`, `--` and `~~` are set operators to the regex engine.
        let doubled_dash = c == '-'
            && (body.get(j + 1) == Some(&'-') || (j > 0 && body[j - 1] == '-'));
        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') || doubled_dash {
            out.push('\\');
        }
        out.push(c);
    }
    out.push(']');
    Some((out, close + 1))
}

/// Prefix/suffix wildcard matching: `*`, `foo*`, `*foo`, `*foo*`.
pub fn affix_match(value: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let leading = pattern.starts_with('*');
    let trailing = pattern.len() > 1 && pattern.ends_with('*');
    let start = usize::from(leading);
    let end = pattern.len() - usize::from(trailing);
    let inner = &pattern[start..end];
    match (leading, trailing) {
        (true, true) => value.contains(inner),
        (true, false) => value.ends_with(inner),
        (false, true) => value.starts_with(inner),
        (false, false) => value == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(registry: &FunctionRegistry, name: &str, args: &[&str]) -> bool {
        let f = registry.get(name).unwrap();
        (f.call)(args).unwrap()
    }

    #[test]
    fn test_key_match() {
        assert!(key_match("/foo/bar", "/foo/*"));
        assert!(key_match("/foo/", "/foo/*"));
        assert!(!key_match("/foo", "/foo/*"));
        assert!(key_match("/foo", "/foo"));
        assert!(!key_match("/bar", "/foo"));
    }

    #[test]
    fn test_key_match2() {
        let r = FunctionRegistry::default();
        assert!(call(&r, "keyMatch2", &["/resource1/123", "/resource1/:id"]));
        assert!(!call(&r, "keyMatch2", &["/resource1/123/x", "/resource1/:id"]));
        assert!(call(&r, "keyMatch2", &["/alice_data/anything/else", "/alice_data/*"]));
        assert!(!call(&r, "keyMatch2", &["/data.json", "/data_json"]));
        assert!(call(&r, "keyMatch2", &["/data.json", "/data.json"]));
    }

    #[test]
    fn test_key_match3() {
        let r = FunctionRegistry::default();
        assert!(call(&r, "keyMatch3", &["/books/42", "/books/{id}"]));
        assert!(call(&r, "keyMatch3", &["/files/a.txt", "/files/{name}.txt"]));
        assert!(!call(&r, "keyMatch3", &["/books/42/pages", "/books/{id}"]));
    }

    #[test]
    fn test_regex_match() {
        let r = FunctionRegistry::default();
        assert!(call(&r, "regexMatch", &["GET", "^(GET|POST)$"]));
        assert!(!call(&r, "regexMatch", &["DELETE", "^(GET|POST)$"]));
    }

    #[test]
    fn test_regex_invalid_pattern_is_error() {
        let r = FunctionRegistry::default();
        let f = r.get("regexMatch").unwrap();
        assert!(matches!((f.call)(&["x", "("]), Err(AuthzError::Evaluation(_))));
    }

    #[test]
    fn test_glob_mode() {
        let r = FunctionRegistry::new(MatchOptions {
            case_sensitive: true,
            pattern_mode: PatternMode::Glob,
        });
        assert!(call(&r, "globMatch", &["/data/reports/q1", "/data/*"]));
        assert!(call(&r, "globMatch", &["/data/a1", "/data/a?"]));
        assert!(call(&r, "globMatch", &["/data/b", "/data/[abc]"]));
        assert!(!call(&r, "globMatch", &["/data/d", "/data/[abc]"]));
        assert!(call(&r, "globMatch", &["/data/d", "/data/[!abc]"]));
        assert!(call(&r, "globMatch", &["/data/7", "/data/[0-9]"]));
        // Empty classes are literal text.
        assert!(call(&r, "globMatch", &["/data/[!]", "/data/[!]"]));
        assert!(!call(&r, "globMatch", &["/data/x", "/data/[!]"]));
        assert!(call(&r, "globMatch", &["/data/[]", "/data/[]"]));
        // Regex set operators inside a class are plain characters.
        assert!(call(&r, "globMatch", &["/data/&", "/data/[a&&b]"]));
        assert!(call(&r, "globMatch", &["/data/~", "/data/[~~]"]));
        assert!(call(&r, "globMatch", &["/data/-", "/data/[a--b]"]));
        assert!(!call(&r, "globMatch", &["/data/c", "/data/[a--b]"]));
        assert!(call(&r, "globMatch", &["/v1/users/7/posts", "/v1/*/posts"]));
    }

    #[test]
    fn test_affix_mode() {
        let r = FunctionRegistry::new(MatchOptions {
            case_sensitive: true,
            pattern_mode: PatternMode::Affix,
        });
        assert!(call(&r, "globMatch", &["/data/reports", "/data/*"]));
        assert!(call(&r, "globMatch", &["report.pdf", "*.pdf"]));
        assert!(call(&r, "globMatch", &["my-report-2024", "*report*"]));
        // Interior wildcards and glob classes are literal in affix mode.
        assert!(!call(&r, "globMatch", &["/v1/users/posts", "/v1/*/posts"]));
        assert!(call(&r, "globMatch", &["/v1/*/posts", "/v1/*/posts"]));
        assert!(!call(&r, "globMatch", &["/data/a1", "/data/a?"]));
    }

    #[test]
    fn test_case_insensitive_functions() {
        let r = FunctionRegistry::new(MatchOptions {
            case_sensitive: false,
            pattern_mode: PatternMode::Glob,
        });
        assert!(call(&r, "keyMatch", &["/FOO/bar", "/foo/*"]));
        assert!(call(&r, "keyMatch2", &["/Users/7", "/users/:id"]));
        assert!(call(&r, "regexMatch", &["get", "^GET$"]));
        assert!(call(&r, "globMatch", &["/DATA/x", "/data/*"]));

        let strict = FunctionRegistry::default();
        assert!(!call(&strict, "keyMatch", &["/FOO/bar", "/foo/*"]));
        assert!(!call(&strict, "globMatch", &["/DATA/x", "/data/*"]));
    }

    #[test]
    fn test_str_eq_options() {
        let insensitive = MatchOptions {
            case_sensitive: false,
            ..Default::default()
        };
        assert!(insensitive.str_eq("Alice", "alice"));
        assert!(!MatchOptions::default().str_eq("Alice", "alice"));
    }

    #[test]
    fn test_register_custom_function() {
        let mut r = FunctionRegistry::default();
        r.register("isOwner", 2, |args| args[0] == args[1]);
        let f = r.get("isOwner").unwrap();
        assert_eq!(f.arity, 2);
        assert!((f.call)(&["bob", "bob"]).unwrap());
        assert!(r.get("nope").is_none());
    }
}
