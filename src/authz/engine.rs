use serde::Serialize;
use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::functions::MatchOptions;
use crate::authz::matcher::{self, Scope};
use crate::authz::model::{CompiledModel, Effect};
use crate::authz::store::{PolicyRule, PolicySnapshot};

/// Outcome of one enforcement call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Values of the rule that decided the outcome, if a single rule did.
    pub matched: Option<Vec<String>>,
}

impl Decision {
    fn by_rule(allowed: bool, rule: &PolicyRule) -> Self {
        Self {
            allowed,
            matched: Some(rule.values().to_vec()),
        }
    }

    fn by_default(allowed: bool) -> Self {
        Self {
            allowed,
            matched: None,
        }
    }
}

/// Effect a single matching rule carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleEffect {
    Allow,
    Deny,
    /// `eft` value that is neither `allow` nor `deny`; never decides anything.
    Indeterminate,
}

fn rule_effect(model: &CompiledModel, rule: &PolicyRule) -> RuleEffect {
    let Some(index) = model.eft_index() else {
        return RuleEffect::Allow;
    };
    match rule.values().get(index).map(String::as_str) {
        Some("allow") => RuleEffect::Allow,
        Some("deny") => RuleEffect::Deny,
        _ => RuleEffect::Indeterminate,
    }
}

/// Evaluate `request` against every rule of `snapshot` and combine the
/// matches according to the model's effect.
///
/// Rules are visited in store order (priority order for priority-ordered
/// stores). Evaluation stops as soon as the outcome can no longer change.
pub fn evaluate(
    model: &CompiledModel,
    request: &[Value],
    snapshot: &PolicySnapshot,
    options: MatchOptions,
) -> Result<Decision, AuthzError> {
    let expected = model.request_fields().len();
    if request.len() != expected {
        return Err(AuthzError::RequestArity {
            expected,
            actual: request.len(),
        });
    }

    let effect = model.effect();
    let mut first_allow: Option<&PolicyRule> = None;

    for rule in snapshot.policies().iter() {
        let scope = Scope {
            request,
            policy: rule.values(),
            roles: snapshot,
            options,
        };
        if !matcher::evaluate(model.matcher(), &scope)? {
            continue;
        }

        match (effect, rule_effect(model, rule)) {
            (_, RuleEffect::Indeterminate) => {}
            (Effect::AllowOverride, RuleEffect::Allow) | (Effect::Priority, RuleEffect::Allow) => {
                return Ok(Decision::by_rule(true, rule));
            }
            (Effect::AllowOverride, RuleEffect::Deny) => {}
            (Effect::DenyOverride, RuleEffect::Allow) => {
                first_allow.get_or_insert(rule);
            }
            (
                Effect::DenyOverride | Effect::AllowUnlessDenied | Effect::Priority,
                RuleEffect::Deny,
            ) => {
                return Ok(Decision::by_rule(false, rule));
            }
            (Effect::AllowUnlessDenied, RuleEffect::Allow) => {}
        }
    }

    Ok(match effect {
        Effect::DenyOverride => match first_allow {
            Some(rule) => Decision::by_rule(true, rule),
            None => Decision::by_default(false),
        },
        Effect::AllowUnlessDenied => Decision::by_default(true),
        Effect::AllowOverride | Effect::Priority => Decision::by_default(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::functions::FunctionRegistry;
    use serde_json::json;

    fn model(policy: &str, effect: &str, matcher: &str) -> CompiledModel {
        let text = format!(
            "[request_definition]\nr = sub, obj, act\n\
             [policy_definition]\np = {policy}\n\
             [role_definition]\ng = _, _\n\
             [policy_effect]\ne = {effect}\n\
             [matchers]\nm = {matcher}\n"
        );
        CompiledModel::compile(&text, &FunctionRegistry::default()).unwrap()
    }

    fn snapshot(model: &CompiledModel, policies: &[&[&str]], roles: &[(&str, &str)]) -> PolicySnapshot {
        let mut snap = PolicySnapshot::empty(std::sync::Arc::new(model.clone()));
        for p in policies {
            snap.add_policy(p.iter().map(|s| s.to_string()).collect())
                .unwrap();
        }
        for (user, role) in roles {
            snap.add_grouping(0, vec![user.to_string(), role.to_string()])
                .unwrap();
        }
        snap
    }

    fn request(sub: &str, obj: &str, act: &str) -> Vec<Value> {
        vec![json!(sub), json!(obj), json!(act)]
    }

    const EXACT: &str = "r.sub == p.sub && r.obj == p.obj && r.act == p.act";
    const ALLOW: &str = "some(where (p.eft == allow))";
    const DENY_OVERRIDE: &str = "some(where (p.eft == allow)) && !some(where (p.eft == deny))";

    #[test]
    fn test_allow_override() {
        let m = model("sub, obj, act", ALLOW, EXACT);
        let s = snapshot(&m, &[&["alice", "/data", "GET"]], &[]);
        let opts = MatchOptions::default();

        let d = evaluate(&m, &request("alice", "/data", "GET"), &s, opts).unwrap();
        assert!(d.allowed);
        assert_eq!(d.matched.unwrap(), vec!["alice", "/data", "GET"]);

        let d = evaluate(&m, &request("alice", "/data", "POST"), &s, opts).unwrap();
        assert_eq!(d, Decision::by_default(false));
    }

    #[test]
    fn test_deny_override_ignores_order() {
        let m = model("sub, obj, act, eft", DENY_OVERRIDE, "r.obj == p.obj");
        let opts = MatchOptions::default();
        let allow: &[&str] = &["alice", "/data", "GET", "allow"];
        let deny: &[&str] = &["bob", "/data", "GET", "deny"];

        for rules in [[allow, deny], [deny, allow]] {
            let s = snapshot(&m, &rules, &[]);
            let d = evaluate(&m, &request("carol", "/data", "GET"), &s, opts).unwrap();
            assert!(!d.allowed);
            assert_eq!(d.matched.unwrap()[3], "deny");
        }
    }

    #[test]
    fn test_allow_unless_denied() {
        let m = model("sub, obj, act, eft", "!some(where (p.eft == deny))", EXACT);
        let opts = MatchOptions::default();

        let empty = snapshot(&m, &[], &[]);
        assert!(evaluate(&m, &request("x", "y", "z"), &empty, opts).unwrap().allowed);

        let s = snapshot(&m, &[&["x", "y", "z", "deny"]], &[]);
        assert!(!evaluate(&m, &request("x", "y", "z"), &s, opts).unwrap().allowed);
        assert!(evaluate(&m, &request("x", "y", "w"), &s, opts).unwrap().allowed);
    }

    #[test]
    fn test_priority_first_match_wins() {
        let m = model(
            "sub, obj, act, eft, priority",
            "priority(p.eft) || deny",
            "g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act",
        );
        let opts = MatchOptions::default();
        let s = snapshot(
            &m,
            &[
                &["staff", "/data", "GET", "allow", "10"],
                &["alice", "/data", "GET", "deny", "1"],
            ],
            &[("alice", "staff"), ("bob", "staff")],
        );

        let d = evaluate(&m, &request("alice", "/data", "GET"), &s, opts).unwrap();
        assert!(!d.allowed);
        assert_eq!(d.matched.unwrap()[0], "alice");
        assert!(evaluate(&m, &request("bob", "/data", "GET"), &s, opts).unwrap().allowed);
        assert!(!evaluate(&m, &request("bob", "/data", "PUT"), &s, opts).unwrap().allowed);
    }

    #[test]
    fn test_indeterminate_eft_never_decides() {
        let m = model("sub, obj, act, eft", ALLOW, EXACT);
        let s = snapshot(&m, &[&["alice", "/data", "GET", "maybe"]], &[]);
        let d = evaluate(&m, &request("alice", "/data", "GET"), &s, MatchOptions::default()).unwrap();
        assert!(!d.allowed);
    }

    #[test]
    fn test_request_arity_is_an_error() {
        let m = model("sub, obj, act", ALLOW, EXACT);
        let s = snapshot(&m, &[], &[]);
        let err = evaluate(&m, &[json!("alice"), json!("/data")], &s, MatchOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            AuthzError::RequestArity {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_type_error_surfaces() {
        let m = model("sub, obj, act", ALLOW, "r.sub > p.sub");
        let s = snapshot(&m, &[&["alice", "/data", "GET"]], &[]);
        let err = evaluate(&m, &request("alice", "/data", "GET"), &s, MatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, AuthzError::Evaluation(_)));
    }
}
