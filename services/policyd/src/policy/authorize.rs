//! Request authorization against the live generation.
//!
//! A request passes when any of the caller's role subjects is allowed
//! `(path, method)`. No loaded generation, no subjects, or no matching role
//! all deny. Paths outside the allowed prefixes, or under a skipped prefix,
//! bypass the check entirely, as does every path when enforcement is off.
use super::PolicyError;
use super::handle::EnforcerHandle;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotLoaded,
    NoMatchingRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum Decision {
    Allow,
    Skipped,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow | Decision::Skipped)
    }

    fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Skipped => "skipped",
            Decision::Deny(DenyReason::NotLoaded) => "deny_not_loaded",
            Decision::Deny(DenyReason::NoMatchingRole) => "deny_no_matching_role",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathRules {
    /// Empty means every path is subject to authorization.
    pub allowed_prefixes: Vec<String>,
    pub skipped_prefixes: Vec<String>,
}

impl PathRules {
    fn bypasses(&self, path: &str) -> bool {
        let allowed = self.allowed_prefixes.is_empty()
            || self
                .allowed_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()));
        !allowed
            || self
                .skipped_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[derive(Clone)]
pub struct Authorizer {
    handle: Arc<EnforcerHandle>,
    rules: PathRules,
    enabled: bool,
}

impl Authorizer {
    pub fn new(handle: Arc<EnforcerHandle>, rules: PathRules) -> Self {
        Self {
            handle,
            rules,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn authorize<S: AsRef<str>>(
        &self,
        subjects: &[S],
        path: &str,
        method: &str,
    ) -> Result<Decision, PolicyError> {
        let decision = self.decide(subjects, path, method)?;
        metrics::counter!("policyd_authorize_total", "decision" => decision.label()).increment(1);
        if !decision.is_allowed() {
            tracing::debug!(path, method, decision = decision.label(), "request denied");
        }
        Ok(decision)
    }

    fn decide<S: AsRef<str>>(
        &self,
        subjects: &[S],
        path: &str,
        method: &str,
    ) -> Result<Decision, PolicyError> {
        if !self.enabled || self.rules.bypasses(path) {
            return Ok(Decision::Skipped);
        }
        // One generation for the whole decision.
        let Some(generation) = self.handle.get() else {
            return Ok(Decision::Deny(DenyReason::NotLoaded));
        };
        for subject in subjects {
            if generation.enforce(subject.as_ref(), path, method)? {
                return Ok(Decision::Allow);
            }
        }
        Ok(Decision::Deny(DenyReason::NoMatchingRole))
    }
}
