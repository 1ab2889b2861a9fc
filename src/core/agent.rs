//! Role state machine
//!
//! Converges live firewall rules to the rule set of the role the cluster
//! manager asked for, persists the role reached and reports the promotion
//! score. Monitoring is read-only: drift is reported, never repaired.
//!
//! | Action  | Effect                                        | Resulting role |
//! |---------|-----------------------------------------------|----------------|
//! | start   | reconcile to Unpromoted, low score            | Unpromoted     |
//! | promote | reconcile to Promoted, high score             | Promoted       |
//! | demote  | reconcile to Unpromoted, low score            | Unpromoted     |
//! | stop    | purge everything, delete state, clear score   | absent         |
//! | monitor | compare live rules with the expected role     | unchanged      |
//!
//! [`dispatch`] is the per-invocation entry point: it validates the
//! parameters, answers `notify` and `validate-all` itself and hands every
//! other action to an [`Agent`].
//!
//! Reconciliation always applies the full target set. Each rule mutation is
//! idempotent, so repeated or overlapping callbacks converge to the same state
//! without any diffing.

use crate::audit::{self, AuditEvent, AuditLog, EventType};
use crate::config::{AgentConfig, Params};
use crate::core::backend::runner::CommandRunner;
use crate::core::backend::{self, FirewallBackend};
use crate::core::error::{Error, Result};
use crate::core::promotion::{CrmAttribute, PromotionSink};
use crate::core::role::{Outcome, Role};
use crate::core::rules::RuleSet;
use crate::core::state::StateFile;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Actions the cluster manager can invoke
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Action {
    Start,
    Stop,
    Promote,
    Demote,
    Monitor,
    Notify,
    ValidateAll,
    MetaData,
}

impl Action {
    /// Whether the action needs a fully validated rule set
    pub const fn requires_rules(self) -> bool {
        matches!(
            self,
            Action::Start | Action::Promote | Action::Demote | Action::Monitor | Action::ValidateAll
        )
    }
}

/// Clone notification passed with `notify`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    /// `pre` or `post`
    pub kind: Option<String>,
    /// The operation being notified about, e.g. `promote`
    pub operation: Option<String>,
}

impl Notification {
    /// Role changes still propagating when these arrive
    fn wants_delay(&self) -> bool {
        self.kind.as_deref() == Some("post")
            && matches!(self.operation.as_deref(), Some("promote" | "demote"))
    }
}

/// Per-invocation inputs from the cluster manager
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub requested_role: Option<Role>,
    pub notification: Notification,
}

/// Acknowledges a clone notification, first waiting `delay` when a role
/// change may still be propagating. Needs neither rules nor a backend.
pub async fn acknowledge(notification: &Notification, delay: Duration) {
    if notification.wants_delay() && !delay.is_zero() {
        info!(
            "Delaying {:?}-{:?} notification by {delay:?}",
            notification.kind, notification.operation
        );
        tokio::time::sleep(delay).await;
    }
}

/// Runs `action` for the parameters of one invocation.
///
/// `runner_for` builds the command runner from the configured command
/// timeout. The firewall and `crm_attribute` share it. Nothing is executed
/// when the parameters are invalid.
pub async fn dispatch<R, F>(action: Action, params: &Params, runner_for: F) -> Outcome
where
    R: CommandRunner + Clone,
    F: FnOnce(Duration) -> R,
{
    if action == Action::MetaData {
        return Outcome::Success;
    }

    let config = match AgentConfig::load(params) {
        Ok(config) => config,
        Err(e) => {
            error!("{action} failed: {e}");
            return Outcome::from(&e);
        }
    };
    tracing::Span::current().record("instance", config.instance.as_str());

    if action == Action::Notify {
        acknowledge(&config.notification, config.notify_delay).await;
        return Outcome::Success;
    }

    let rules = match config.rule_set() {
        Ok(rules) => rules,
        Err(e) if action.requires_rules() => {
            error!("{action} failed: {e}");
            return Outcome::from(&e);
        }
        Err(e) => {
            // Stop must still clean up after a parameter change
            debug!("Continuing {action} without rules: {e}");
            RuleSet::new(Vec::new(), config.blocking_role)
        }
    };

    let runner = runner_for(config.command_timeout);
    let backend = match backend::detect(runner.clone(), &config.chain) {
        Ok(backend) => backend,
        Err(e) => {
            error!("{action} failed: {e}");
            return Outcome::from(&e);
        }
    };

    if action == Action::ValidateAll {
        if !nix::unistd::geteuid().is_root() {
            warn!("Not running as root; firewall changes will be refused");
        }
        info!(
            "Configuration valid: {} rules, blocking while {}, backend {}",
            rules.all().len(),
            rules.blocking_role(),
            backend.name()
        );
        return Outcome::Success;
    }

    let state = StateFile::new(&config.state_path);
    let agent = Agent::new(backend, CrmAttribute::new(runner), rules, state)
        .with_audit(AuditLog::beside(&config.state_path));

    agent.run(action, &config.request()).await
}

/// How the live rules look compared to the full rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveShape {
    AllPresent,
    NonePresent,
    Partial { present: usize, total: usize },
}

pub struct Agent<B, P> {
    backend: B,
    promotion: P,
    rules: RuleSet,
    state: StateFile,
    audit: Option<AuditLog>,
}

impl<B: FirewallBackend, P: PromotionSink> Agent<B, P> {
    pub fn new(backend: B, promotion: P, rules: RuleSet, state: StateFile) -> Self {
        Self {
            backend,
            promotion,
            rules,
            state,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Option<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn promotion(&self) -> &P {
        &self.promotion
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    /// Runs one action and folds every error into an [`Outcome`].
    pub async fn run(&self, action: Action, request: &Request) -> Outcome {
        let result = match action {
            Action::Start => self.start(request.requested_role).await,
            Action::Stop => self.stop().await,
            Action::Promote => self.promote().await,
            Action::Demote => self.demote().await,
            Action::Monitor => self.monitor(request.requested_role).await,
            // Answered by `dispatch` without a backend
            Action::Notify | Action::ValidateAll | Action::MetaData => Ok(Outcome::Success),
        };

        match result {
            Ok(outcome) => {
                debug!("{action} finished: {outcome}");
                outcome
            }
            Err(e) => {
                error!("{action} failed: {e}");
                Outcome::from(&e)
            }
        }
    }

    /// Brings the resource up. A node started directly into the Promoted role
    /// converges straight to it.
    pub async fn start(&self, requested: Option<Role>) -> Result<Outcome> {
        let role = match requested {
            Some(Role::Promoted) => {
                info!("Start requested with role Promoted");
                Role::Promoted
            }
            _ => Role::Unpromoted,
        };
        self.transition(EventType::Start, role).await
    }

    pub async fn promote(&self) -> Result<Outcome> {
        if self.state.read()? == Some(Role::Promoted) {
            debug!("Already Promoted, re-applying");
        }
        self.transition(EventType::Promote, Role::Promoted).await
    }

    pub async fn demote(&self) -> Result<Outcome> {
        if self.state.read()? == Some(Role::Unpromoted) {
            debug!("Already Unpromoted, re-applying");
        }
        self.transition(EventType::Demote, Role::Unpromoted).await
    }

    /// Removes every rule regardless of role.
    pub async fn stop(&self) -> Result<Outcome> {
        let result = async {
            self.backend.purge_all().await?;
            self.state.remove()?;
            self.promotion.clear_score().await?;
            info!("Stopped: all {} rules removed", self.backend.name());
            Ok::<_, Error>(())
        }
        .await;

        self.record(EventType::Stop, None, &result).await;
        result.map(|()| Outcome::Success)
    }

    /// Checks live rules against `expected`, or the persisted role when the
    /// cluster manager did not say which role to expect.
    pub async fn monitor(&self, expected: Option<Role>) -> Result<Outcome> {
        let persisted = self.state.read()?;
        let shape = self.live_shape().await?;

        let Some(role) = expected.or(persisted) else {
            // No hint at all: a complete blocking set still identifies the role
            if shape == LiveShape::AllPresent {
                let role = self.rules.blocking_role();
                warn!("Rules present without a state file, running as {role}");
                return Ok(Outcome::running_as(role));
            }
            debug!("No state file and no complete rule set: not running");
            return Ok(Outcome::NotRunning);
        };

        let target_empty = self.rules.target(role).is_empty();

        if target_empty && persisted.is_none() {
            // An empty rule set cannot tell "running" from "never started"
            debug!("Expected {role} has no rules and no state file exists: not running");
            return Ok(Outcome::NotRunning);
        }

        let healthy = match shape {
            LiveShape::AllPresent => !target_empty,
            LiveShape::NonePresent => target_empty,
            LiveShape::Partial { .. } => false,
        };

        if healthy {
            debug!("Rules match {role}");
            Ok(Outcome::running_as(role))
        } else {
            warn!(
                "Rule drift: expected {role} ({} rules) but found {shape:?}",
                self.rules.target(role).len()
            );
            Ok(Outcome::NotRunning)
        }
    }

    /// Inspects every rule of the full set without mutating anything.
    pub async fn live_shape(&self) -> Result<LiveShape> {
        let total = self.rules.all().len();
        let mut present = 0;
        for spec in self.rules.all() {
            if self.backend.rule_exists(spec).await? {
                present += 1;
            }
        }

        Ok(match present {
            0 => LiveShape::NonePresent,
            n if n == total => LiveShape::AllPresent,
            n => LiveShape::Partial { present: n, total },
        })
    }

    async fn transition(&self, event: EventType, role: Role) -> Result<Outcome> {
        let result = self.converge(role).await;
        let reached = result.is_ok().then_some(role);
        self.record(event, reached, &result).await;
        result.map(|()| Outcome::Success)
    }

    async fn converge(&self, role: Role) -> Result<()> {
        self.reconcile(role).await?;
        self.state.write(role)?;
        self.promotion.set_score(role.promotion_score()).await?;
        info!(
            "Reached {role}: {} rules enforced via {}",
            self.rules.target(role).len(),
            self.backend.name()
        );
        Ok(())
    }

    /// Applies the whole target set for `role`.
    ///
    /// Stops at the first failing rule; rules applied earlier in the pass stay
    /// in place.
    async fn reconcile(&self, role: Role) -> Result<()> {
        let target = self.rules.target(role);

        if target.is_empty() {
            return self.backend.purge_all().await;
        }

        self.backend
            .ensure_container()
            .await
            .map_err(Error::container)?;
        for (applied, spec) in target.iter().enumerate() {
            if let Err(e) = self.backend.apply_rule(spec).await {
                error!(
                    "Failed to apply {spec} ({applied} of {} rules in place)",
                    target.len()
                );
                return Err(e);
            }
        }
        Ok(())
    }

    async fn record(&self, event: EventType, role: Option<Role>, result: &Result<()>) {
        let details = serde_json::json!({
            "rule_count": role.map_or(0, |r| self.rules.target(r).len()),
            "blocking_role": self.rules.blocking_role(),
        });
        let error = result.as_ref().err().map(ToString::to_string);
        let event = AuditEvent::new(event, role, self.backend.name(), details, error);
        audit::record(self.audit.as_ref(), event).await;
    }
}
