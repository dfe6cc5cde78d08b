/*!
 * Monthly budget ledger.
 *
 * Spend is recorded after each translator call from the cost the call
 * reported, and checked before the next call. Only the hard ceiling blocks;
 * the alert threshold merely raises a flag for dashboards. Periods are keyed
 * by calendar month and created lazily on first use.
 */

use chrono::{Datelike, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app_config::BudgetConfig;
use crate::database::models::BudgetPeriodRecord;
use crate::database::Repository;
use crate::errors::PipelineError;

/// Budget health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    /// Spending is below the alert threshold
    OnTrack,
    /// Spending crossed the alert threshold
    Warning,
    /// Ceiling reached; new calls are refused
    OverBudget,
}

impl BudgetStatus {
    pub fn from_spend(spent_usd: f64, ceiling_usd: f64, threshold_pct: f64) -> Self {
        if spent_usd >= ceiling_usd {
            Self::OverBudget
        } else if spent_usd >= ceiling_usd * threshold_pct / 100.0 {
            Self::Warning
        } else {
            Self::OnTrack
        }
    }
}

impl std::fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetStatus::OnTrack => write!(f, "on_track"),
            BudgetStatus::Warning => write!(f, "warning"),
            BudgetStatus::OverBudget => write!(f, "over_budget"),
        }
    }
}

/// Read model of one budget period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub month: String,
    pub ceiling_usd: f64,
    pub spent_usd: f64,
    pub alert_threshold_pct: f64,
    pub alert_triggered: bool,
    pub exhausted: bool,
    pub remaining_usd: f64,
    pub status: BudgetStatus,
}

impl From<&BudgetPeriodRecord> for BudgetSnapshot {
    fn from(period: &BudgetPeriodRecord) -> Self {
        Self {
            month: period.month.clone(),
            ceiling_usd: period.ceiling_usd,
            spent_usd: period.spent_usd,
            alert_threshold_pct: period.alert_threshold_pct,
            alert_triggered: period.alert_triggered_at.is_some(),
            exhausted: period.is_exhausted(),
            remaining_usd: (period.ceiling_usd - period.spent_usd).max(0.0),
            status: BudgetStatus::from_spend(
                period.spent_usd,
                period.ceiling_usd,
                period.alert_threshold_pct,
            ),
        }
    }
}

/// Admin change to the current period; unset fields stay as they are
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetUpdate {
    pub ceiling_usd: Option<f64>,
    pub alert_threshold_pct: Option<f64>,
}

impl BudgetUpdate {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.ceiling_usd.is_none() && self.alert_threshold_pct.is_none() {
            return Err(PipelineError::Validation(
                "budget update needs ceiling_usd and/or alert_threshold_pct".to_string(),
            ));
        }
        if let Some(ceiling) = self.ceiling_usd {
            if !ceiling.is_finite() || ceiling < 0.0 {
                return Err(PipelineError::Validation(format!(
                    "ceiling_usd must be a non-negative amount, got {}",
                    ceiling
                )));
            }
        }
        if let Some(threshold) = self.alert_threshold_pct {
            if !(threshold > 0.0 && threshold <= 100.0) {
                return Err(PipelineError::Validation(format!(
                    "alert_threshold_pct must be in (0, 100], got {}",
                    threshold
                )));
            }
        }
        Ok(())
    }
}

/// `YYYY-MM` key of the month containing `date`
pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Budget ledger backed by the `budget_periods` table
#[derive(Clone)]
pub struct BudgetLedger {
    repo: Repository,
    defaults: BudgetConfig,
}

impl BudgetLedger {
    pub fn new(repo: Repository, defaults: BudgetConfig) -> Self {
        Self { repo, defaults }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Period for the month containing `date`, created on first use.
    ///
    /// A new period starts at zero spend and inherits the limits of the most
    /// recent earlier period, or the configured defaults.
    pub async fn period_at(&self, date: NaiveDate) -> Result<BudgetPeriodRecord, PipelineError> {
        let month = month_key(date);
        if let Some(period) = self.repo.get_budget_period(&month).await? {
            return Ok(period);
        }

        let (ceiling, threshold) = match self.repo.latest_budget_period_before(&month).await? {
            Some(previous) => (previous.ceiling_usd, previous.alert_threshold_pct),
            None => (self.defaults.monthly_ceiling_usd, self.defaults.alert_threshold_pct),
        };

        info!(
            "Opening budget period {} (ceiling ${:.2}, alert at {:.0}%)",
            month, ceiling, threshold
        );
        let period = self
            .repo
            .insert_budget_period(&BudgetPeriodRecord::new(month, ceiling, threshold))
            .await?;
        Ok(period)
    }

    pub async fn current_period(&self) -> Result<BudgetPeriodRecord, PipelineError> {
        self.period_at(Self::today()).await
    }

    /// Pre-flight check: refuses once spend has reached the ceiling
    pub async fn check(&self) -> Result<BudgetSnapshot, PipelineError> {
        self.check_at(Self::today()).await
    }

    pub async fn check_at(&self, date: NaiveDate) -> Result<BudgetSnapshot, PipelineError> {
        let period = self.period_at(date).await?;
        if period.is_exhausted() {
            return Err(PipelineError::BudgetExceeded {
                spent_usd: period.spent_usd,
                ceiling_usd: period.ceiling_usd,
            });
        }
        Ok(BudgetSnapshot::from(&period))
    }

    /// Add the actual cost of a call to the current period
    pub async fn record_spend(&self, amount_usd: f64) -> Result<BudgetSnapshot, PipelineError> {
        self.record_spend_at(Self::today(), amount_usd).await
    }

    pub async fn record_spend_at(
        &self,
        date: NaiveDate,
        amount_usd: f64,
    ) -> Result<BudgetSnapshot, PipelineError> {
        if !amount_usd.is_finite() || amount_usd < 0.0 {
            return Err(PipelineError::Validation(format!(
                "spend amount must be a non-negative number, got {}",
                amount_usd
            )));
        }

        let period = self.period_at(date).await?;
        if amount_usd == 0.0 {
            return Ok(BudgetSnapshot::from(&period));
        }

        let was_alerted = period.alert_triggered_at.is_some();
        let updated = self
            .repo
            .add_spend(&period.month, amount_usd)
            .await?
            .ok_or_else(|| PipelineError::Internal(format!("budget period {} disappeared", period.month)))?;

        if !was_alerted && updated.alert_triggered_at.is_some() {
            warn!(
                "Budget alert: ${:.2} of ${:.2} spent in {} (threshold {:.0}%)",
                updated.spent_usd, updated.ceiling_usd, updated.month, updated.alert_threshold_pct
            );
        }
        if updated.is_exhausted() && !period.is_exhausted() {
            warn!(
                "Budget ceiling reached for {}: ${:.2} of ${:.2}; further calls are refused",
                updated.month, updated.spent_usd, updated.ceiling_usd
            );
        }

        Ok(BudgetSnapshot::from(&updated))
    }

    pub async fn snapshot(&self) -> Result<BudgetSnapshot, PipelineError> {
        self.snapshot_at(Self::today()).await
    }

    pub async fn snapshot_at(&self, date: NaiveDate) -> Result<BudgetSnapshot, PipelineError> {
        Ok(BudgetSnapshot::from(&self.period_at(date).await?))
    }

    /// Change the current period's ceiling and/or alert threshold
    pub async fn update_limits(&self, update: &BudgetUpdate) -> Result<BudgetSnapshot, PipelineError> {
        self.update_limits_at(Self::today(), update).await
    }

    pub async fn update_limits_at(
        &self,
        date: NaiveDate,
        update: &BudgetUpdate,
    ) -> Result<BudgetSnapshot, PipelineError> {
        update.validate()?;

        let period = self.period_at(date).await?;
        let updated = self
            .repo
            .update_budget_limits(&period.month, update.ceiling_usd, update.alert_threshold_pct)
            .await?
            .ok_or_else(|| PipelineError::Internal(format!("budget period {} disappeared", period.month)))?;

        info!(
            "Budget for {} set to ${:.2} with alert at {:.0}%",
            updated.month, updated.ceiling_usd, updated.alert_threshold_pct
        );
        Ok(BudgetSnapshot::from(&updated))
    }
}
