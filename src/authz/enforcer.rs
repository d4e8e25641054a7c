//! The enforcer: the public entry point tying model, store and adapter together.
//!
//! An [`Enforcer`] is built explicitly, either through [`Enforcer::builder`],
//! [`Enforcer::from_files`] or [`Enforcer::from_settings`], and shared by
//! `Arc` with whatever needs decisions. All methods take `&self`; mutations
//! are serialized internally and published as whole snapshots, so `enforce`
//! never blocks and never observes a half-applied change.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::authz::adapter::{Adapter, FileAdapter, PolicyLine};
use crate::authz::engine::{self, Decision};
use crate::authz::errors::AuthzError;
use crate::authz::functions::{FunctionRegistry, MatchOptions, PatternMode};
use crate::authz::model::CompiledModel;
use crate::authz::roles::RoleGraph;
use crate::authz::store::{PolicySnapshot, PolicyStore};
use crate::settings::Authz;

/// Name of the role definition used by the role-management helpers.
const DEFAULT_GROUPING: &str = "g";

type CustomFn = Box<dyn Fn(&[&str]) -> bool + Send + Sync>;

pub struct Enforcer {
    store: PolicyStore,
    adapter: Option<Box<dyn Adapter>>,
    registry: FunctionRegistry,
}

#[derive(Default)]
pub struct EnforcerBuilder {
    model_text: Option<String>,
    model_path: Option<PathBuf>,
    adapter: Option<Box<dyn Adapter>>,
    options: MatchOptions,
    functions: Vec<(String, usize, CustomFn)>,
}

impl EnforcerBuilder {
    pub fn model_text(mut self, text: impl Into<String>) -> Self {
        self.model_text = Some(text.into());
        self
    }

    pub fn model_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapter = Some(Box::new(adapter));
        self
    }

    pub fn policy_file(self, path: impl Into<PathBuf>) -> Self {
        self.adapter(FileAdapter::new(path))
    }

    pub fn options(mut self, options: MatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.options.case_sensitive = case_sensitive;
        self
    }

    pub fn pattern_mode(mut self, mode: PatternMode) -> Self {
        self.options.pattern_mode = mode;
        self
    }

    /// Make a custom predicate callable from the matcher as `name(arg, ...)`.
    pub fn function<F>(mut self, name: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&[&str]) -> bool + Send + Sync + 'static,
    {
        self.functions.push((name.to_string(), arity, Box::new(f)));
        self
    }

    /// Compile the model and, if an adapter was given, load its policy.
    pub fn build(self) -> Result<Enforcer, AuthzError> {
        let mut registry = FunctionRegistry::new(self.options);
        for (name, arity, f) in self.functions {
            registry.register(&name, arity, f);
        }

        let model = match (self.model_text, self.model_path) {
            (Some(text), _) => CompiledModel::compile(&text, &registry)?,
            (None, Some(path)) => CompiledModel::from_file(&path, &registry)?,
            (None, None) => {
                return Err(AuthzError::InvalidModel(
                    "no model text or model file given".into(),
                ))
            }
        };
        let model = Arc::new(model);

        let snapshot = match &self.adapter {
            Some(adapter) => {
                let lines = adapter.load_policy()?;
                let snapshot = PolicySnapshot::from_lines(model, &lines)?;
                log_loaded(&snapshot);
                snapshot
            }
            None => PolicySnapshot::empty(model),
        };

        Ok(Enforcer {
            store: PolicyStore::new(snapshot),
            adapter: self.adapter,
            registry,
        })
    }
}

impl Enforcer {
    pub fn builder() -> EnforcerBuilder {
        EnforcerBuilder::default()
    }

    /// Model from `model_path`; policy from the CSV file at `policy_path`, if any.
    pub fn from_files(model_path: &Path, policy_path: Option<&Path>) -> Result<Self, AuthzError> {
        let builder = Self::builder().model_file(model_path);
        match policy_path {
            Some(path) => builder.policy_file(path).build(),
            None => builder.build(),
        }
    }

    pub fn from_settings(settings: &Authz) -> Result<Self, AuthzError> {
        let builder = Self::builder()
            .model_file(&settings.model_path)
            .case_sensitive(settings.case_sensitive)
            .pattern_mode(settings.pattern_mode);
        match &settings.policy_path {
            Some(path) => builder.policy_file(path).build(),
            None => builder.build(),
        }
    }

    // ─── Decisions ──────────────────────────────────────────────────────

    /// Decide whether `request` (one value per request field) is allowed.
    ///
    /// A deny is `Ok(false)`; `Err` means no decision could be made.
    pub fn enforce<I, V>(&self, request: I) -> Result<bool, AuthzError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enforce_ex(request).map(|d| d.allowed)
    }

    /// Like [`Enforcer::enforce`], also reporting the rule that decided.
    pub fn enforce_ex<I, V>(&self, request: I) -> Result<Decision, AuthzError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let request: Vec<Value> = request.into_iter().map(Into::into).collect();
        let snapshot = self.store.snapshot();
        let decision = engine::evaluate(
            snapshot.model(),
            &request,
            &snapshot,
            self.registry.options(),
        )?;
        tracing::debug!(?request, allowed = decision.allowed, matched = ?decision.matched, "enforce");
        Ok(decision)
    }

    // ─── Policy rules ───────────────────────────────────────────────────

    /// Returns `false` if the rule was already present.
    pub fn add_policy<S: Into<String>>(
        &self,
        values: impl IntoIterator<Item = S>,
    ) -> Result<bool, AuthzError> {
        let values = to_values(values);
        self.store.update(|s| s.add_policy(values))
    }

    /// Add several rules in one atomic step. Returns how many were new.
    pub fn add_policies(&self, rules: Vec<Vec<String>>) -> Result<usize, AuthzError> {
        self.store.update(|s| {
            let mut added = 0;
            for values in rules {
                added += usize::from(s.add_policy(values)?);
            }
            Ok(added)
        })
    }

    /// Returns `false` if the rule was not present.
    pub fn remove_policy<S: Into<String>>(
        &self,
        values: impl IntoIterator<Item = S>,
    ) -> Result<bool, AuthzError> {
        let values = to_values(values);
        self.store.update(|s| s.remove_policy(&values))
    }

    /// Remove several rules in one atomic step. Returns how many were present.
    pub fn remove_policies(&self, rules: Vec<Vec<String>>) -> Result<usize, AuthzError> {
        self.store.update(|s| {
            let mut removed = 0;
            for values in &rules {
                removed += usize::from(s.remove_policy(values)?);
            }
            Ok(removed)
        })
    }

    /// Replace `old` with `new` in one step. Returns `false` if `old` was not present.
    pub fn update_policy<S: Into<String>, T: Into<String>>(
        &self,
        old: impl IntoIterator<Item = S>,
        new: impl IntoIterator<Item = T>,
    ) -> Result<bool, AuthzError> {
        let old = to_values(old);
        let new = to_values(new);
        self.store.update(|s| {
            if !s.remove_policy(&old)? {
                return Ok(false);
            }
            s.add_policy(new)?;
            Ok(true)
        })
    }

    /// Remove every rule whose fields from `field_index` on match `filter`;
    /// an empty filter value matches anything.
    pub fn remove_filtered_policy<S: Into<String>>(
        &self,
        field_index: usize,
        filter: impl IntoIterator<Item = S>,
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        let filter = to_values(filter);
        self.store
            .update(|s| s.remove_filtered_policy(field_index, &filter))
    }

    pub fn has_policy<S: Into<String>>(&self, values: impl IntoIterator<Item = S>) -> bool {
        let values = to_values(values);
        self.store.snapshot().policies().contains(&values)
    }

    pub fn get_policy(&self) -> Vec<Vec<String>> {
        let snapshot = self.store.snapshot();
        snapshot
            .policies()
            .iter()
            .map(|r| r.values().to_vec())
            .collect()
    }

    pub fn get_filtered_policy<S: Into<String>>(
        &self,
        field_index: usize,
        filter: impl IntoIterator<Item = S>,
    ) -> Vec<Vec<String>> {
        let mut prefix = vec![String::new(); field_index];
        prefix.extend(to_values(filter));
        let snapshot = self.store.snapshot();
        snapshot
            .policies()
            .with_prefix(&prefix)
            .map(|r| r.values().to_vec())
            .collect()
    }

    pub fn clear_policy(&self) {
        // Clearing cannot fail.
        let _ = self.store.update(|s| {
            s.clear();
            Ok(())
        });
    }

    // ─── Grouping rules ─────────────────────────────────────────────────

    pub fn add_grouping_policy<S: Into<String>>(
        &self,
        values: impl IntoIterator<Item = S>,
    ) -> Result<bool, AuthzError> {
        self.add_named_grouping_policy(DEFAULT_GROUPING, values)
    }

    /// Add an assignment to the role definition `name` (`g`, `g2`, ...).
    pub fn add_named_grouping_policy<S: Into<String>>(
        &self,
        name: &str,
        values: impl IntoIterator<Item = S>,
    ) -> Result<bool, AuthzError> {
        let values = to_values(values);
        self.store.update(|s| {
            let index = grouping_index(s, name)?;
            s.add_grouping(index, values)
        })
    }

    pub fn remove_grouping_policy<S: Into<String>>(
        &self,
        values: impl IntoIterator<Item = S>,
    ) -> Result<bool, AuthzError> {
        self.remove_named_grouping_policy(DEFAULT_GROUPING, values)
    }

    pub fn remove_named_grouping_policy<S: Into<String>>(
        &self,
        name: &str,
        values: impl IntoIterator<Item = S>,
    ) -> Result<bool, AuthzError> {
        let values = to_values(values);
        self.store.update(|s| {
            let index = grouping_index(s, name)?;
            s.remove_grouping(index, &values)
        })
    }

    pub fn get_grouping_policy(&self) -> Vec<Vec<String>> {
        self.get_named_grouping_policy(DEFAULT_GROUPING)
    }

    pub fn get_named_grouping_policy(&self, name: &str) -> Vec<Vec<String>> {
        let snapshot = self.store.snapshot();
        snapshot
            .grouping_index(name)
            .and_then(|i| snapshot.grouping(i))
            .map(|g| g.rules().iter().map(|r| r.values().to_vec()).collect())
            .unwrap_or_default()
    }

    // ─── Roles ──────────────────────────────────────────────────────────

    /// Give `user` the role `role`, optionally within `domain`.
    pub fn add_role_for_user(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool, AuthzError> {
        self.add_grouping_policy(assignment(user, role, domain))
    }

    pub fn delete_role_for_user(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool, AuthzError> {
        self.remove_grouping_policy(assignment(user, role, domain))
    }

    /// Roles assigned to `user` directly.
    pub fn get_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        self.with_default_graph(|g| g.direct_roles(user, domain).into_iter().collect())
    }

    /// Roles `user` holds directly or through inheritance.
    pub fn get_implicit_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        self.with_default_graph(|g| g.roles_of(user, domain).into_iter().collect())
    }

    /// Everyone holding `role`, directly or through inheritance.
    pub fn get_users_for_role(&self, role: &str, domain: Option<&str>) -> Vec<String> {
        self.with_default_graph(|g| g.users_of(role, domain).into_iter().collect())
    }

    pub fn has_role_for_user(&self, user: &str, role: &str, domain: Option<&str>) -> bool {
        let snapshot = self.store.snapshot();
        snapshot
            .grouping_index(DEFAULT_GROUPING)
            .and_then(|i| snapshot.grouping(i))
            .map(|g| user != role && g.graph().has_link(user, role, domain))
            .unwrap_or(false)
    }

    fn with_default_graph<F>(&self, f: F) -> Vec<String>
    where
        F: FnOnce(&RoleGraph) -> Vec<String>,
    {
        let snapshot = self.store.snapshot();
        snapshot
            .grouping_index(DEFAULT_GROUPING)
            .and_then(|i| snapshot.grouping(i))
            .map(|g| f(g.graph()))
            .unwrap_or_default()
    }

    // ─── Persistence and model ──────────────────────────────────────────

    /// Replace every rule with what the adapter holds. On error nothing changes.
    pub fn load_policy(&self) -> Result<(), AuthzError> {
        let adapter = self.adapter.as_ref().ok_or(AuthzError::NoAdapter)?;
        let lines = adapter.load_policy()?;
        self.store.rebuild(|current| {
            let next = PolicySnapshot::from_lines(current.shared_model(), &lines)?;
            log_loaded(&next);
            Ok(next)
        })
    }

    /// Write every rule to the adapter.
    pub fn save_policy(&self) -> Result<(), AuthzError> {
        let adapter = self.adapter.as_ref().ok_or(AuthzError::NoAdapter)?;
        let lines = self.store.snapshot().lines();
        adapter.save_policy(&lines)?;
        tracing::info!(rules = lines.len(), "Saved policy");
        Ok(())
    }

    /// Compile `text` and switch to it, keeping every stored rule.
    ///
    /// Fails, leaving the current model active, if the text does not compile
    /// or a stored rule does not fit the new definitions.
    pub fn load_model(&self, text: &str) -> Result<(), AuthzError> {
        let model = Arc::new(CompiledModel::compile(text, &self.registry)?);
        self.store
            .rebuild(|current| PolicySnapshot::from_lines(model, &current.lines()))
    }

    pub fn model(&self) -> Arc<CompiledModel> {
        self.store.snapshot().shared_model()
    }

    pub fn options(&self) -> MatchOptions {
        self.registry.options()
    }

    /// Every stored rule as adapter lines.
    pub fn lines(&self) -> Vec<PolicyLine> {
        self.store.snapshot().lines()
    }
}

fn to_values<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Vec<String> {
    values.into_iter().map(Into::into).collect()
}

fn assignment(user: &str, role: &str, domain: Option<&str>) -> Vec<String> {
    let mut values = vec![user.to_string(), role.to_string()];
    values.extend(domain.map(str::to_string));
    values
}

fn grouping_index(snapshot: &PolicySnapshot, name: &str) -> Result<usize, AuthzError> {
    snapshot.grouping_index(name).ok_or_else(|| {
        AuthzError::InvalidRule(format!("model has no role definition `{name}`"))
    })
}

fn log_loaded(snapshot: &PolicySnapshot) {
    tracing::info!(
        policies = snapshot.policies().len(),
        groupings = snapshot
            .groupings()
            .iter()
            .map(|g| g.rules().len())
            .sum::<usize>(),
        role_links = snapshot
            .groupings()
            .iter()
            .map(|g| g.graph().link_count())
            .sum::<usize>(),
        "Loaded policy"
    );
}
