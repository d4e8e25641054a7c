//! Role graph: the transitive "has role" relation used by role predicates.
//!
//! Each domain is an independent namespace. Links added without a domain live
//! in the default domain. Reachability is a breadth-first walk with a seen-set,
//! so cycles terminate and every node is visited at most once per query.

use std::collections::{BTreeSet, HashSet, VecDeque};

use im::{HashMap as ImHashMap, HashSet as ImHashSet};

const DEFAULT_DOMAIN: &str = "";

type Edges = ImHashMap<String, ImHashSet<String>>;

#[derive(Debug, Clone, Default)]
struct DomainLinks {
    /// name -> roles it holds directly
    parents: Edges,
    /// role -> names holding it directly
    children: Edges,
}

impl DomainLinks {
    fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Persistent maps throughout: a clone is shared until one side changes.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    domains: ImHashMap<String, DomainLinks>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `child` has role `parent`. Returns `false` if the link already existed.
    pub fn add_link(&mut self, child: &str, parent: &str, domain: Option<&str>) -> bool {
        let links = self
            .domains
            .entry(domain.unwrap_or(DEFAULT_DOMAIN).to_string())
            .or_insert_with(DomainLinks::default);
        let added = link(&mut links.parents, child, parent);
        link(&mut links.children, parent, child);
        added
    }

    /// Remove a direct link. Returns `false` if it did not exist.
    pub fn remove_link(&mut self, child: &str, parent: &str, domain: Option<&str>) -> bool {
        let key = domain.unwrap_or(DEFAULT_DOMAIN);
        let Some(links) = self.domains.get_mut(key) else {
            return false;
        };

        let removed = unlink(&mut links.parents, child, parent);
        unlink(&mut links.children, parent, child);
        if links.is_empty() {
            self.domains.remove(key);
        }
        removed
    }

    /// Whether `name` reaches `role` directly or transitively. A name always has itself.
    pub fn has_link(&self, name: &str, role: &str, domain: Option<&str>) -> bool {
        if name == role {
            return true;
        }
        let Some(links) = self.links(domain) else {
            return false;
        };
        walk(&links.parents, name).any(|reached| reached == role)
    }

    /// Roles `name` holds directly.
    pub fn direct_roles(&self, name: &str, domain: Option<&str>) -> BTreeSet<String> {
        self.links(domain)
            .and_then(|links| links.parents.get(name))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every role `name` holds, following inheritance.
    pub fn roles_of(&self, name: &str, domain: Option<&str>) -> BTreeSet<String> {
        match self.links(domain) {
            Some(links) => walk(&links.parents, name)
                .filter(|r| *r != name)
                .map(str::to_string)
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Every name that holds `role`, directly or through intermediate roles.
    pub fn users_of(&self, role: &str, domain: Option<&str>) -> BTreeSet<String> {
        match self.links(domain) {
            Some(links) => walk(&links.children, role)
                .filter(|u| *u != role)
                .map(str::to_string)
                .collect(),
            None => BTreeSet::new(),
        }
    }

    pub fn link_count(&self) -> usize {
        self.domains
            .values()
            .flat_map(|links| links.parents.values())
            .map(|roles| roles.len())
            .sum()
    }

    pub fn clear(&mut self) {
        self.domains = ImHashMap::new();
    }

    fn links(&self, domain: Option<&str>) -> Option<&DomainLinks> {
        self.domains.get(domain.unwrap_or(DEFAULT_DOMAIN))
    }
}

fn link(edges: &mut Edges, from: &str, to: &str) -> bool {
    edges
        .entry(from.to_string())
        .or_insert_with(ImHashSet::new)
        .insert(to.to_string())
        .is_none()
}

fn unlink(edges: &mut Edges, from: &str, to: &str) -> bool {
    let Some(targets) = edges.get_mut(from) else {
        return false;
    };
    let removed = targets.remove(to).is_some();
    if targets.is_empty() {
        edges.remove(from);
    }
    removed
}

/// Breadth-first traversal from `start` over `edges`, yielding each reachable
/// node once (the start node included).
fn walk<'a>(edges: &'a Edges, start: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut queue: VecDeque<&'a str> = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    std::iter::from_fn(move || {
        let current = queue.pop_front()?;
        if let Some(next) = edges.get(current) {
            for n in next.iter() {
                if seen.insert(n.as_str()) {
                    queue.push_back(n.as_str());
                }
            }
        }
        Some(current)
    })
}
