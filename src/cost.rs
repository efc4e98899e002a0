//! Cost governance.
//!
//! The governor owns an append-only ledger of every charged provider call
//! and enforces three caps at once: total budget, per-row budget, and
//! per-provider caps. A provider that hits its cap is disabled for the rest
//! of the governor's life (typically one job) unless explicitly re-enabled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::types::{Field, ProviderTier};

/// One charged provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub row_id: String,
    pub table_id: String,
    pub provider: String,
    pub field: Field,
    pub cents: u32,
    pub timestamp: DateTime<Utc>,
}

/// Append-only cost ledger with running totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostLedger {
    pub entries: Vec<LedgerEntry>,
    pub total_cents: u32,
    pub by_provider: HashMap<String, u32>,
    pub by_row: HashMap<String, u32>,
}

impl CostLedger {
    fn record(&mut self, entry: LedgerEntry) {
        self.total_cents += entry.cents;
        *self.by_provider.entry(entry.provider.clone()).or_default() += entry.cents;
        *self.by_row.entry(entry.row_id.clone()).or_default() += entry.cents;
        self.entries.push(entry);
    }
}

/// Budget split for one row's remaining cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetPartition {
    /// Free tier has no budget: unlimited.
    pub free_unlimited: bool,
    pub cheap_cents: u32,
    pub premium_cents: u32,
}

/// Governor tunables.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub total_budget_cents: u32,
    /// Default budget per row.
    pub row_budget_cents: u32,
    /// Optional hard caps per provider name.
    pub provider_caps: HashMap<String, u32>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            total_budget_cents: 10_000,
            row_budget_cents: 50,
            provider_caps: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct GovernorState {
    ledger: CostLedger,
    disabled: HashSet<String>,
}

/// Tracks spend and answers affordability questions.
pub struct CostGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
}

impl CostGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GovernorState::default()),
        }
    }

    /// Whether an estimated call fits all remaining budgets at once.
    pub fn can_afford(&self, provider: &str, est_cents: u32, row_id: Option<&str>) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        if state.disabled.contains(provider) {
            return false;
        }
        let total_spent = state.ledger.total_cents;
        if total_spent + est_cents > self.config.total_budget_cents {
            return false;
        }
        if let Some(row) = row_id {
            let row_spent = state.ledger.by_row.get(row).copied().unwrap_or(0);
            if row_spent + est_cents > self.config.row_budget_cents {
                return false;
            }
        }
        if let Some(cap) = self.config.provider_caps.get(provider) {
            let provider_spent = state.ledger.by_provider.get(provider).copied().unwrap_or(0);
            if provider_spent + est_cents > *cap {
                return false;
            }
        }
        true
    }

    /// Append a charge. Called exactly when a provider call succeeded enough
    /// to contribute evidence.
    pub fn record_cost(
        &self,
        row_id: &str,
        table_id: &str,
        provider: &str,
        field: Field,
        cents: u32,
    ) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.ledger.record(LedgerEntry {
            row_id: row_id.to_string(),
            table_id: table_id.to_string(),
            provider: provider.to_string(),
            field,
            cents,
            timestamp: Utc::now(),
        });

        if let Some(cap) = self.config.provider_caps.get(provider) {
            let spent = state.ledger.by_provider.get(provider).copied().unwrap_or(0);
            if spent >= *cap && state.disabled.insert(provider.to_string()) {
                tracing::warn!(provider, cap, spent, "provider disabled: cap reached");
            }
        }
    }

    /// Partition a row's remaining budget across tiers: free is unlimited,
    /// cheap gets 40%, premium 60%.
    pub fn allocate_row_budget(&self, row_id: &str) -> BudgetPartition {
        let remaining = self.row_remaining_cents(row_id);
        BudgetPartition {
            free_unlimited: true,
            cheap_cents: remaining * 2 / 5,
            premium_cents: remaining * 3 / 5,
        }
    }

    pub fn row_remaining_cents(&self, row_id: &str) -> u32 {
        let spent = self
            .state
            .lock()
            .map(|s| s.ledger.by_row.get(row_id).copied().unwrap_or(0))
            .unwrap_or(0);
        self.config.row_budget_cents.saturating_sub(spent)
    }

    pub fn total_remaining_cents(&self) -> u32 {
        let spent = self
            .state
            .lock()
            .map(|s| s.ledger.total_cents)
            .unwrap_or(0);
        self.config.total_budget_cents.saturating_sub(spent)
    }

    /// Keep only providers this row can still pay for, cheapest tiers first.
    pub fn filter_affordable(
        &self,
        candidates: Vec<(String, ProviderTier, u32)>,
        row_id: &str,
    ) -> Vec<(String, ProviderTier, u32)> {
        let mut affordable: Vec<_> = candidates
            .into_iter()
            .filter(|(name, _, cost)| self.can_afford(name, *cost, Some(row_id)))
            .collect();
        sort_by_efficiency(&mut affordable);
        affordable
    }

    pub fn is_disabled(&self, provider: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.disabled.contains(provider))
            .unwrap_or(false)
    }

    pub fn disable_provider(&self, provider: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.disabled.insert(provider.to_string());
        }
    }

    pub fn enable_provider(&self, provider: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.disabled.remove(provider);
        }
    }

    /// Clear the ledger and the disabled set.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = GovernorState::default();
        }
    }

    pub fn ledger(&self) -> CostLedger {
        self.state
            .lock()
            .map(|s| s.ledger.clone())
            .unwrap_or_default()
    }
}

/// Order candidates by tier, then by per-call cost.
pub fn sort_by_efficiency(candidates: &mut [(String, ProviderTier, u32)]) {
    candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
}
