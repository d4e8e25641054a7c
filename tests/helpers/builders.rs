use gatehouse::authz::{Enforcer, MatchOptions, PatternMode};

/// Builder for an in-memory enforcer preloaded with rules
pub struct EnforcerFixture {
    model: String,
    policies: Vec<Vec<String>>,
    roles: Vec<Vec<String>>,
    options: MatchOptions,
}

impl EnforcerFixture {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            policies: Vec::new(),
            roles: Vec::new(),
            options: MatchOptions::default(),
        }
    }

    pub fn policy(mut self, values: &[&str]) -> Self {
        self.policies
            .push(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// `user` has `role` (no domain)
    pub fn role(mut self, user: &str, role: &str) -> Self {
        self.roles.push(vec![user.to_string(), role.to_string()]);
        self
    }

    pub fn role_in(mut self, user: &str, role: &str, domain: &str) -> Self {
        self.roles
            .push(vec![user.to_string(), role.to_string(), domain.to_string()]);
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.options.case_sensitive = false;
        self
    }

    pub fn pattern_mode(mut self, mode: PatternMode) -> Self {
        self.options.pattern_mode = mode;
        self
    }

    pub fn build(self) -> Enforcer {
        let enforcer = Enforcer::builder()
            .model_text(self.model)
            .options(self.options)
            .build()
            .expect("Failed to build enforcer");
        enforcer
            .add_policies(self.policies)
            .expect("Failed to add policies");
        for role in self.roles {
            enforcer
                .add_grouping_policy(role)
                .expect("Failed to add role");
        }
        enforcer
    }
}
