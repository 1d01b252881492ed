//! `WaitForAvailableQuotas` step.
//!
//! Polls regional quota tables until every requested `(Region, Metric)` has
//! `Limit - Usage >= Units` at the same time. The poll loop selects on the
//! workflow cancel signal and returns `Ok(())` when it fires: a workflow
//! shutting down is an orderly way for the wait to end, not a failure. The
//! per-step deadline is enforced by the scheduler and surfaces as `Timeout`.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use gantry_types::{FlowError, Result};
use gantry_util::duration::parse_duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

/// Poll cadence when the document does not set one.
const DEFAULT_INTERVAL: &str = "5s";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WaitForAvailableQuotasStep {
    /// Poll interval as a duration string.
    pub interval: String,
    pub quotas: Vec<QuotaRequirement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QuotaRequirement {
    pub metric: String,
    pub region: String,
    pub units: f64,
}

impl WaitForAvailableQuotasStep {
    fn interval(&self) -> Result<Duration> {
        let interval = parse_duration(&self.interval).map_err(|e| FlowError::invalid_input(format!("Interval: {e}")).with_source(e))?;
        if interval.is_zero() {
            return Err(FlowError::invalid_input("Interval must be positive"));
        }
        Ok(interval)
    }

    /// One poll: true when every requirement is satisfied concurrently.
    async fn satisfied(&self, workflow: &Workflow) -> Result<bool> {
        let regions: BTreeSet<&str> = self.quotas.iter().map(|q| q.region.as_str()).collect();
        for region_name in regions {
            let region = workflow
                .api
                .get_region(&workflow.project, region_name)
                .await
                .map_err(api_err)?;
            for requirement in self.quotas.iter().filter(|q| q.region == region_name) {
                let Some(quota) = region.quotas.iter().find(|q| q.metric == requirement.metric) else {
                    debug!(metric = %requirement.metric, region = region_name, "quota metric not reported yet");
                    return Ok(false);
                };
                if quota.limit - quota.usage < requirement.units {
                    debug!(
                        metric = %requirement.metric,
                        region = region_name,
                        available = quota.limit - quota.usage,
                        needed = requirement.units,
                        "quota not yet available"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl StepAction for WaitForAvailableQuotasStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        if self.interval.is_empty() {
            self.interval = DEFAULT_INTERVAL.into();
        }
        Ok(())
    }

    fn validate(&self, _workflow: &Workflow, _step_name: &str) -> Result<()> {
        self.interval()?;
        if self.quotas.is_empty() {
            return Err(FlowError::invalid_input("WaitForAvailableQuotas requires at least one quota"));
        }
        for requirement in &self.quotas {
            if requirement.metric.is_empty() {
                return Err(FlowError::invalid_input("quota requirement is missing a Metric"));
            }
            if requirement.region.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "quota requirement {:?} is missing a Region",
                    requirement.metric
                )));
            }
            if !requirement.units.is_finite() || requirement.units < 0.0 {
                return Err(FlowError::invalid_input(format!(
                    "quota requirement {:?} has invalid Units {}",
                    requirement.metric, requirement.units
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval()?);
        loop {
            tokio::select! {
                _ = workflow.cancel.cancelled() => {
                    // Orderly shutdown; the cancel cause is reported elsewhere.
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if self.satisfied(workflow).await? {
                        info!(step = step_name, "requested quotas are available");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(units: f64) -> WaitForAvailableQuotasStep {
        WaitForAvailableQuotasStep {
            interval: "0.1s".into(),
            quotas: vec![QuotaRequirement {
                metric: "CPUS".into(),
                region: "us-central1".into(),
                units,
            }],
        }
    }

    #[test]
    fn interval_must_parse() {
        let mut bad = step(1.0);
        bad.interval = "soon".into();
        assert!(bad.validate(&dummy_workflow(), "wait").is_err());
        assert!(step(1.0).validate(&dummy_workflow(), "wait").is_ok());
    }

    #[test]
    fn units_must_be_non_negative() {
        assert!(step(-1.0).validate(&dummy_workflow(), "wait").is_err());
        assert!(step(0.0).validate(&dummy_workflow(), "wait").is_ok());
    }

    fn dummy_workflow() -> Workflow {
        crate::test_support::bare_workflow()
    }
}
