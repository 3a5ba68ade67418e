// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Guard rails around the language-analysis service.
//
// Every call is capped on input length, response time, and daily spend. The
// spend tracker resets at the first call of each new UTC day.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use folio_core::{LanguageConfig, LanguageService, ServiceError};

use crate::text::truncate_head_tail;

/// Spend counters for the current UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageStats {
    pub today_spend: f64,
    pub budget_remaining: f64,
    pub total_calls_today: u32,
    pub budget_percent_used: f64,
}

#[derive(Debug)]
struct UsageState {
    day: NaiveDate,
    spent: f64,
    calls: u32,
}

impl UsageState {
    fn roll_to(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(previous = %self.day, spent = self.spent, calls = self.calls, "Daily usage reset");
            self.day = today;
            self.spent = 0.0;
            self.calls = 0;
        }
    }
}

/// Tracks language-service spend against a daily budget.
#[derive(Debug)]
pub struct UsageTracker {
    daily_budget: f64,
    state: Mutex<UsageState>,
}

impl UsageTracker {
    pub fn new(daily_budget: f64) -> Self {
        Self {
            daily_budget,
            state: Mutex::new(UsageState {
                day: Utc::now().date_naive(),
                spent: 0.0,
                calls: 0,
            }),
        }
    }

    /// Whether a call costing `cost` still fits in today's budget.
    pub fn can_spend(&self, cost: f64) -> bool {
        self.can_spend_on(cost, Utc::now().date_naive())
    }

    /// Charge one call, or refuse it if it would exceed the budget.
    pub fn try_reserve(&self, cost: f64) -> Result<(), ServiceError> {
        self.try_reserve_on(cost, Utc::now().date_naive())
    }

    pub fn stats(&self) -> UsageStats {
        self.stats_on(Utc::now().date_naive())
    }

    fn can_spend_on(&self, cost: f64, today: NaiveDate) -> bool {
        match self.state.lock() {
            Ok(mut state) => {
                state.roll_to(today);
                state.spent + cost <= self.daily_budget
            }
            Err(_) => false,
        }
    }

    fn try_reserve_on(&self, cost: f64, today: NaiveDate) -> Result<(), ServiceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ServiceError::Unavailable("usage tracker lock poisoned".into()))?;
        state.roll_to(today);
        if state.spent + cost > self.daily_budget {
            warn!(spent = state.spent, budget = self.daily_budget, "Daily language budget exhausted");
            return Err(ServiceError::BudgetExceeded {
                spent: state.spent,
                budget: self.daily_budget,
            });
        }
        state.spent += cost;
        state.calls += 1;
        debug!(spent = state.spent, calls = state.calls, "Language call charged");
        Ok(())
    }

    fn stats_on(&self, today: NaiveDate) -> UsageStats {
        let (spent, calls) = match self.state.lock() {
            Ok(mut state) => {
                state.roll_to(today);
                (state.spent, state.calls)
            }
            Err(_) => (0.0, 0),
        };
        let percent = if self.daily_budget > 0.0 {
            spent / self.daily_budget * 100.0
        } else {
            100.0
        };
        UsageStats {
            today_spend: (spent * 10_000.0).round() / 10_000.0,
            budget_remaining: ((self.daily_budget - spent).max(0.0) * 10_000.0).round() / 10_000.0,
            total_calls_today: calls,
            budget_percent_used: (percent * 10.0).round() / 10.0,
        }
    }
}

/// A [`LanguageService`] wrapped in input, time, and spend limits.
pub struct GuardedLanguageService {
    inner: Arc<dyn LanguageService>,
    config: LanguageConfig,
    usage: UsageTracker,
}

impl GuardedLanguageService {
    pub fn new(inner: Arc<dyn LanguageService>, config: LanguageConfig) -> Self {
        let usage = UsageTracker::new(config.daily_budget_usd);
        Self {
            inner,
            config,
            usage,
        }
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn config(&self) -> &LanguageConfig {
        &self.config
    }
}

#[async_trait]
impl LanguageService for GuardedLanguageService {
    #[instrument(skip_all, fields(input_chars = text.chars().count()))]
    async fn analyze(
        &self,
        prompt: &str,
        text: &str,
        max_output_tokens: u32,
    ) -> Result<String, ServiceError> {
        self.usage.try_reserve(self.config.cost_per_call_usd)?;

        let input = truncate_head_tail(text, self.config.max_input_chars);
        let tokens = max_output_tokens.min(self.config.max_output_tokens);
        let budget = Duration::from_secs(self.config.call_timeout_secs);

        let response = tokio::time::timeout(budget, self.inner.analyze(prompt, &input, tokens))
            .await
            .map_err(|_| {
                warn!(timeout_secs = budget.as_secs(), "Language call timed out");
                ServiceError::Timeout(budget)
            })??;

        let response = response.trim();
        if response.is_empty() {
            return Err(ServiceError::InvalidResponse("empty response".into()));
        }
        Ok(response.to_string())
    }
}
