use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

/// Per-round acquisition budgets, consumed in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSchedule(Vec<i64>);

impl BudgetSchedule {
    /// Strict constructor used at configuration time: every entry must be positive.
    pub fn new(budgets: &[i64]) -> TrainingResult<Self> {
        if let Some((idx, bad)) = budgets.iter().enumerate().find(|(_, b)| **b <= 0) {
            return Err(TrainingError::config(format!(
                "budget_schedule[{idx}] must be positive, got {bad}"
            )));
        }
        Ok(Self(budgets.to_vec()))
    }

    /// Builds a schedule without validation. The selector treats a non-positive
    /// entry as the end of the schedule.
    #[must_use]
    pub fn unchecked(budgets: Vec<i64>) -> Self {
        Self(budgets)
    }

    #[must_use]
    pub fn rounds(&self) -> &[i64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of positive budgets.
    #[must_use]
    pub fn total(&self) -> usize {
        self.0.iter().filter(|b| **b > 0).map(|b| *b as usize).sum()
    }

    /// Stable textual key, e.g. `800-400`.
    #[must_use]
    pub fn key(&self) -> String {
        self.0.iter().map(ToString::to_string).collect::<Vec<_>>().join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_non_positive() {
        assert!(BudgetSchedule::new(&[800, 400]).is_ok());
        assert!(BudgetSchedule::new(&[800, 0]).is_err());
        assert!(BudgetSchedule::new(&[-1]).is_err());
    }

    #[test]
    fn test_total_and_key() {
        let schedule = BudgetSchedule::new(&[800, 400]).unwrap();
        assert_eq!(schedule.total(), 1200);
        assert_eq!(schedule.key(), "800-400");
        assert_eq!(schedule.len(), 2);
    }
}
