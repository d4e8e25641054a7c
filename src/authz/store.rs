//! Policy store: rule sets, immutable snapshots, and copy-on-write publication.
//!
//! A [`PolicySnapshot`] holds every `p` rule plus, per role definition, its
//! grouping rules and the [`RoleGraph`] built from them. Snapshots are never
//! modified once published: [`PolicyStore::update`] clones the current one,
//! applies the change, and swaps the new snapshot in with a single atomic
//! pointer store. Readers holding the old `Arc` keep a consistent view.
//!
//! Rule sets and role graphs are persistent (`im`) collections, so the clone
//! shares everything with its parent and a mutation copies only what it touches.

use std::ops::Bound;
use std::sync::Arc;

use arc_swap::ArcSwap;
use im::{HashMap as ImHashMap, OrdMap};
use parking_lot::Mutex;

use crate::authz::adapter::PolicyLine;
use crate::authz::errors::AuthzError;
use crate::authz::matcher::RoleLookup;
use crate::authz::model::CompiledModel;
use crate::authz::roles::RoleGraph;

pub const POLICY_TYPE: &str = "p";

/// One stored rule. Immutable; mutation replaces rules wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    values: Vec<String>,
    priority: Option<i64>,
}

impl PolicyRule {
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn priority(&self) -> Option<i64> {
        self.priority
    }
}

/// Position of a rule: (priority, insertion sequence).
type OrderKey = (i64, u64);

/// Deduplicated, ordered rules of one type.
///
/// Order is insertion order, or ascending priority (ties in insertion order)
/// when the set is priority-ordered. Both maps are persistent, so cloning a
/// set is constant time and a later add or remove copies only the touched path.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: OrdMap<OrderKey, Arc<PolicyRule>>,
    keys: ImHashMap<Vec<String>, OrderKey>,
    next_seq: u64,
    priority_ordered: bool,
}

impl RuleSet {
    pub fn new(priority_ordered: bool) -> Self {
        Self {
            priority_ordered,
            ..Default::default()
        }
    }

    /// Returns `false` if an identical rule is already present.
    pub fn add(&mut self, values: Vec<String>, priority: Option<i64>) -> bool {
        if self.keys.contains_key(&values) {
            return false;
        }
        let rank = if self.priority_ordered {
            priority.unwrap_or(i64::MAX)
        } else {
            0
        };
        let key = (rank, self.next_seq);
        self.next_seq += 1;

        self.keys.insert(values.clone(), key);
        self.rules
            .insert(key, Arc::new(PolicyRule { values, priority }));
        true
    }

    /// Returns `false` if no identical rule was present.
    pub fn remove(&mut self, values: &[String]) -> bool {
        match self.keys.remove(values) {
            Some(key) => {
                self.rules.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Remove every rule whose values starting at `field_index` match `filter`
    /// (an empty filter value matches anything). Returns the removed rules.
    pub fn remove_filtered(&mut self, field_index: usize, filter: &[String]) -> Vec<Vec<String>> {
        let removed: Vec<Vec<String>> = self
            .iter()
            .filter(|r| matches_filter(&r.values, field_index, filter))
            .map(|r| r.values.clone())
            .collect();
        for values in &removed {
            self.remove(values);
        }
        removed
    }

    pub fn contains(&self, values: &[String]) -> bool {
        self.keys.contains_key(values)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyRule> + '_ {
        self.rules.values().map(|r| r.as_ref())
    }

    /// Rules whose leading values equal `prefix` (empty prefix values match anything).
    ///
    /// The iterator is lazy and can be cloned to restart from its current position.
    pub fn with_prefix<'a>(&'a self, prefix: &'a [String]) -> Rules<'a> {
        Rules {
            set: self,
            prefix,
            after: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Cursor over the rules of a [`RuleSet`] matching a prefix.
#[derive(Debug, Clone)]
pub struct Rules<'a> {
    set: &'a RuleSet,
    prefix: &'a [String],
    after: Option<OrderKey>,
}

impl<'a> Iterator for Rules<'a> {
    type Item = &'a PolicyRule;

    fn next(&mut self) -> Option<Self::Item> {
        let set = self.set;
        loop {
            let lower = self.after.map_or(Bound::Unbounded, Bound::Excluded);
            let (key, rule) = set.rules.range((lower, Bound::Unbounded)).next()?;
            self.after = Some(*key);
            if matches_filter(&rule.values, 0, self.prefix) {
                return Some(rule.as_ref());
            }
        }
    }
}

fn matches_filter(values: &[String], field_index: usize, filter: &[String]) -> bool {
    filter.iter().enumerate().all(|(i, f)| {
        f.is_empty()
            || values
                .get(field_index + i)
                .map(|v| v == f)
                .unwrap_or(false)
    })
}

/// Grouping rules of one role definition (`g`, `g2`, ...) and their graph.
#[derive(Debug, Clone)]
pub struct Grouping {
    name: String,
    with_domain: bool,
    rules: RuleSet,
    graph: RoleGraph,
}

impl Grouping {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn graph(&self) -> &RoleGraph {
        &self.graph
    }

    fn arity(&self) -> usize {
        if self.with_domain {
            3
        } else {
            2
        }
    }
}

/// A complete, immutable view of the model, its policies and role assignments.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    model: Arc<CompiledModel>,
    policy_arity: usize,
    priority_index: Option<usize>,
    policies: RuleSet,
    groupings: Vec<Grouping>,
}

impl PolicySnapshot {
    /// Empty snapshot shaped by `model`'s policy and role definitions.
    pub fn empty(model: Arc<CompiledModel>) -> Self {
        let priority_index = model.priority_index();
        Self {
            policy_arity: model.policy_fields().len(),
            priority_index,
            policies: RuleSet::new(priority_index.is_some()),
            groupings: model
                .role_definitions()
                .iter()
                .map(|def| Grouping {
                    name: def.name.clone(),
                    with_domain: def.with_domain,
                    rules: RuleSet::new(false),
                    graph: RoleGraph::new(),
                })
                .collect(),
            model,
        }
    }

    /// Build a snapshot from stored lines, rejecting the whole set on the first bad line.
    pub fn from_lines(model: Arc<CompiledModel>, lines: &[PolicyLine]) -> Result<Self, AuthzError> {
        let mut snapshot = Self::empty(model);
        for line in lines {
            snapshot.apply_line(line)?;
        }
        Ok(snapshot)
    }

    /// Add a `p` rule or a grouping rule according to `line.ptype`.
    pub fn apply_line(&mut self, line: &PolicyLine) -> Result<bool, AuthzError> {
        if line.ptype == POLICY_TYPE {
            return self.add_policy(line.values.clone());
        }
        let index = self.grouping_index(&line.ptype).ok_or_else(|| {
            AuthzError::InvalidRule(format!(
                "unknown rule type `{}` (no matching policy or role definition)",
                line.ptype
            ))
        })?;
        self.add_grouping(index, line.values.clone())
    }

    pub fn add_policy(&mut self, values: Vec<String>) -> Result<bool, AuthzError> {
        self.check_policy_arity(&values)?;
        let priority = match self.priority_index {
            Some(i) => Some(values[i].trim().parse::<i64>().map_err(|_| {
                AuthzError::InvalidRule(format!(
                    "priority `{}` is not an integer in rule {values:?}",
                    values[i]
                ))
            })?),
            None => None,
        };
        Ok(self.policies.add(values, priority))
    }

    pub fn remove_policy(&mut self, values: &[String]) -> Result<bool, AuthzError> {
        self.check_policy_arity(values)?;
        Ok(self.policies.remove(values))
    }

    pub fn remove_filtered_policy(
        &mut self,
        field_index: usize,
        filter: &[String],
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        if field_index + filter.len() > self.policy_arity {
            return Err(AuthzError::InvalidRule(format!(
                "filter at field {field_index} with {} value(s) exceeds policy arity {}",
                filter.len(),
                self.policy_arity
            )));
        }
        Ok(self.policies.remove_filtered(field_index, filter))
    }

    pub fn add_grouping(&mut self, index: usize, values: Vec<String>) -> Result<bool, AuthzError> {
        let grouping = self.grouping_mut(index)?;
        check_arity(&grouping.name, grouping.arity(), &values)?;
        let domain = values.get(2).map(String::as_str);
        grouping.graph.add_link(&values[0], &values[1], domain);
        let added = grouping.rules.add(values, None);
        Ok(added)
    }

    pub fn remove_grouping(&mut self, index: usize, values: &[String]) -> Result<bool, AuthzError> {
        let grouping = self.grouping_mut(index)?;
        check_arity(&grouping.name, grouping.arity(), values)?;
        if !grouping.rules.remove(values) {
            return Ok(false);
        }
        let domain = values.get(2).map(String::as_str);
        grouping.graph.remove_link(&values[0], &values[1], domain);
        Ok(true)
    }

    pub fn model(&self) -> &CompiledModel {
        &self.model
    }

    pub fn shared_model(&self) -> Arc<CompiledModel> {
        Arc::clone(&self.model)
    }

    pub fn clear(&mut self) {
        self.policies = RuleSet::new(self.priority_index.is_some());
        for grouping in &mut self.groupings {
            grouping.rules = RuleSet::new(false);
            grouping.graph.clear();
        }
    }

    pub fn policies(&self) -> &RuleSet {
        &self.policies
    }

    pub fn groupings(&self) -> &[Grouping] {
        &self.groupings
    }

    pub fn grouping_index(&self, name: &str) -> Option<usize> {
        self.groupings.iter().position(|g| g.name == name)
    }

    pub fn grouping(&self, index: usize) -> Option<&Grouping> {
        self.groupings.get(index)
    }

    /// Every stored rule as a line, `p` rules first.
    pub fn lines(&self) -> Vec<PolicyLine> {
        let policies = self.policies.iter().map(|r| PolicyLine {
            ptype: POLICY_TYPE.to_string(),
            values: r.values.clone(),
        });
        let groupings = self.groupings.iter().flat_map(|g| {
            g.rules.iter().map(|r| PolicyLine {
                ptype: g.name.clone(),
                values: r.values.clone(),
            })
        });
        policies.chain(groupings).collect()
    }

    fn grouping_mut(&mut self, index: usize) -> Result<&mut Grouping, AuthzError> {
        self.groupings.get_mut(index).ok_or_else(|| {
            AuthzError::InvalidRule(format!("no role definition at index {index}"))
        })
    }

    fn check_policy_arity(&self, values: &[String]) -> Result<(), AuthzError> {
        check_arity(POLICY_TYPE, self.policy_arity, values)
    }
}

fn check_arity(ptype: &str, expected: usize, values: &[String]) -> Result<(), AuthzError> {
    if values.len() != expected {
        return Err(AuthzError::InvalidRule(format!(
            "`{ptype}` rule needs {expected} value(s), got {}: {values:?}",
            values.len()
        )));
    }
    Ok(())
}

impl RoleLookup for PolicySnapshot {
    fn has_link(&self, role_type: usize, name: &str, role: &str, domain: Option<&str>) -> bool {
        match self.groupings.get(role_type) {
            Some(grouping) => grouping.graph.has_link(name, role, domain),
            None => name == role,
        }
    }
}

/// Holder of the current snapshot. Writers are serialized; readers never block.
#[derive(Debug)]
pub struct PolicyStore {
    current: ArcSwap<PolicySnapshot>,
    writer: Mutex<()>,
}

impl PolicyStore {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Apply `f` to a private copy of the current snapshot and publish it.
    /// On error nothing is published.
    pub fn update<T, F>(&self, f: F) -> Result<T, AuthzError>
    where
        F: FnOnce(&mut PolicySnapshot) -> Result<T, AuthzError>,
    {
        let _guard = self.writer.lock();
        let mut next = PolicySnapshot::clone(&self.current.load());
        let out = f(&mut next)?;
        self.current.store(Arc::new(next));
        Ok(out)
    }

    /// Build a new snapshot from the current one and publish it in its place.
    /// On error nothing is published.
    pub fn rebuild<F>(&self, f: F) -> Result<(), AuthzError>
    where
        F: FnOnce(&PolicySnapshot) -> Result<PolicySnapshot, AuthzError>,
    {
        let _guard = self.writer.lock();
        let next = f(&self.current.load())?;
        self.current.store(Arc::new(next));
        Ok(())
    }
}
