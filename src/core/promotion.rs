//! Promotion score reporting
//!
//! The cluster manager ranks promotion candidates by this score, not by the
//! firewall state, so it is written before an action returns.

use crate::core::backend::runner::CommandRunner;
use crate::core::error::{Result, StderrPattern};
use tracing::{debug, warn};

pub const CRM_ATTRIBUTE: &str = "crm_attribute";

#[allow(async_fn_in_trait)]
pub trait PromotionSink {
    async fn set_score(&self, score: u32) -> Result<()>;
    async fn clear_score(&self) -> Result<()>;
}

/// Writes the node's promotion attribute through `crm_attribute --promotion`.
///
/// On hosts without the cluster tools (running the agent by hand) the write is
/// skipped with a warning.
pub struct CrmAttribute<R> {
    runner: R,
}

impl<R: CommandRunner> CrmAttribute<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    async fn invoke(&self, tail: &[&str], tolerated: Option<StderrPattern>) -> Result<()> {
        if !self.runner.has_program(CRM_ATTRIBUTE) {
            warn!("{CRM_ATTRIBUTE} not found, promotion score not updated");
            return Ok(());
        }

        let mut args: Vec<String> = ["--promotion", "-l", "reboot"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        args.extend(tail.iter().map(|s| (*s).to_string()));

        let out = self.runner.run(CRM_ATTRIBUTE, &args).await?;
        if !out.success() && tolerated == Some(StderrPattern::classify(&out.stderr)) {
            debug!("Promotion attribute already absent");
            return Ok(());
        }
        out.check(CRM_ATTRIBUTE, &args)?;
        Ok(())
    }
}

impl<R: CommandRunner> PromotionSink for CrmAttribute<R> {
    async fn set_score(&self, score: u32) -> Result<()> {
        let score = score.to_string();
        self.invoke(&["-v", &score], None).await?;
        debug!("Promotion score set to {score}");
        Ok(())
    }

    async fn clear_score(&self) -> Result<()> {
        self.invoke(&["-D"], Some(StderrPattern::Missing)).await
    }
}
