//! Shared test utilities for core module tests
//!
//! Scripted and in-memory stand-ins for the command runner, the firewall
//! backend and the promotion sink. Nothing here touches the host firewall.
//! This module is only compiled in test mode.

use crate::core::backend::FirewallBackend;
use crate::core::backend::runner::{CommandOutput, CommandRunner, render};
use crate::core::error::{Error, Result};
use crate::core::promotion::PromotionSink;
use crate::core::role::Role;
use crate::core::rules::{self, RuleSet, RuleSpec};
use crate::core::state::StateFile;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};

/// Successful command with no output
pub fn ok() -> CommandOutput {
    exit(0)
}

/// Successful command printing `stdout`
pub fn ok_with(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// The reply `nft` gives for a table or chain that does not exist
pub fn missing() -> CommandOutput {
    CommandOutput {
        status: Some(1),
        stdout: String::new(),
        stderr: "Error: No such file or directory\n".to_string(),
    }
}

pub fn exit(code: i32) -> CommandOutput {
    CommandOutput {
        status: Some(code),
        ..CommandOutput::default()
    }
}

/// Command runner replaying queued responses.
///
/// Once the queue is empty every command succeeds with no output. Each call
/// is recorded as its rendered command line.
pub struct ScriptedRunner {
    programs: Option<HashSet<String>>,
    responses: RefCell<VecDeque<CommandOutput>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    /// Runner on a host where every program is installed
    pub fn new() -> Self {
        Self {
            programs: None,
            responses: RefCell::new(VecDeque::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Runner on a host where only `programs` are installed
    pub fn with_programs(programs: &[&str]) -> Self {
        Self {
            programs: Some(programs.iter().map(|p| (*p).to_string()).collect()),
            ..Self::new()
        }
    }

    pub fn push(&self, output: CommandOutput) {
        self.responses.borrow_mut().push_back(output);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(render(program, args));
        Ok(self.responses.borrow_mut().pop_front().unwrap_or_else(ok))
    }

    fn has_program(&self, program: &str) -> bool {
        self.programs
            .as_ref()
            .is_none_or(|programs| programs.contains(program))
    }
}

/// In-memory firewall keyed by presence key.
pub struct FakeBackend {
    installed: RefCell<HashSet<String>>,
    container: Cell<bool>,
    /// Number of successful `apply_rule` calls before every further one fails
    fail_after: Cell<Option<usize>>,
    applied: Cell<usize>,
    unavailable: Cell<bool>,
    mutations: Cell<usize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            installed: RefCell::new(HashSet::new()),
            container: Cell::new(false),
            fail_after: Cell::new(None),
            applied: Cell::new(0),
            unavailable: Cell::new(false),
            mutations: Cell::new(0),
        }
    }

    pub fn fail_after(&self, successes: usize) {
        self.applied.set(0);
        self.fail_after.set(Some(successes));
    }

    /// Makes every call fail as if the tool vanished mid-run
    pub fn make_unavailable(&self) {
        self.unavailable.set(true);
    }

    /// Installs a rule behind the agent's back
    pub fn inject(&self, spec: &RuleSpec) {
        self.container.set(true);
        self.installed.borrow_mut().insert(spec.presence_key());
    }

    /// Removes a rule behind the agent's back
    pub fn remove(&self, spec: &RuleSpec) {
        self.installed.borrow_mut().remove(&spec.presence_key());
    }

    pub fn installed(&self) -> usize {
        self.installed.borrow().len()
    }

    pub fn has_container(&self) -> bool {
        self.container.get()
    }

    pub fn contains(&self, spec: &RuleSpec) -> bool {
        self.installed.borrow().contains(&spec.presence_key())
    }

    /// Count of calls that inserted or removed anything
    pub fn mutations(&self) -> usize {
        self.mutations.get()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.get() {
            Err(Error::BackendUnavailable)
        } else {
            Ok(())
        }
    }
}

impl FirewallBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ensure_container(&self) -> Result<()> {
        self.check_available()?;
        if !self.container.replace(true) {
            self.mutations.set(self.mutations.get() + 1);
        }
        Ok(())
    }

    async fn rule_exists(&self, spec: &RuleSpec) -> Result<bool> {
        self.check_available()?;
        Ok(self.contains(spec))
    }

    async fn apply_rule(&self, spec: &RuleSpec) -> Result<()> {
        self.check_available()?;
        if self.contains(spec) {
            return Ok(());
        }
        if let Some(limit) = self.fail_after.get()
            && self.applied.get() >= limit
        {
            return Err(Error::RuleMutation {
                command: format!("fake add {spec}"),
                exit_code: Some(1),
                stderr: "Error: Operation not permitted".to_string(),
            });
        }
        self.applied.set(self.applied.get() + 1);
        self.mutations.set(self.mutations.get() + 1);
        self.installed.borrow_mut().insert(spec.presence_key());
        Ok(())
    }

    async fn purge_all(&self) -> Result<()> {
        self.check_available()?;
        let had_rules = !self.installed.borrow().is_empty();
        if had_rules || self.container.get() {
            self.mutations.set(self.mutations.get() + 1);
        }
        self.installed.borrow_mut().clear();
        self.container.set(false);
        Ok(())
    }
}

/// Promotion sink remembering the current score and every write.
#[derive(Default)]
pub struct RecordingPromotion {
    score: Cell<Option<u32>>,
    history: RefCell<Vec<Option<u32>>>,
}

impl RecordingPromotion {
    pub fn score(&self) -> Option<u32> {
        self.score.get()
    }

    pub fn history(&self) -> Vec<Option<u32>> {
        self.history.borrow().clone()
    }
}

impl PromotionSink for RecordingPromotion {
    async fn set_score(&self, score: u32) -> Result<()> {
        self.score.set(Some(score));
        self.history.borrow_mut().push(Some(score));
        Ok(())
    }

    async fn clear_score(&self) -> Result<()> {
        self.score.set(None);
        self.history.borrow_mut().push(None);
        Ok(())
    }
}

/// Two ports from two sources, blocked while Unpromoted.
pub fn sample_rules() -> RuleSet {
    sample_rules_blocking(Role::Unpromoted)
}

pub fn sample_rules_blocking(blocking_role: Role) -> RuleSet {
    let specs = rules::parse("5432,8008", Some("10.0.0.5,2001:db8::/64")).unwrap();
    RuleSet::new(specs, blocking_role)
}

/// State file inside a fresh temporary directory. Keep the `TempDir` alive.
pub fn temp_state() -> (tempfile::TempDir, StateFile) {
    let dir = tempfile::tempdir().unwrap();
    let state = StateFile::new(dir.path().join("roleguard-pgsql.state"));
    (dir, state)
}
