use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::{AppError, AppResult};
use crate::model::session::{SessionDefinition, SessionState, SessionStatus};
use crate::store::Store;

#[derive(Debug, Default)]
pub struct DayInitReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    /// Definitions that could not be initialised; the others are unaffected.
    pub failed: Vec<(String, AppError)>,
}

pub struct SessionRegistry {
    definitions: Vec<SessionDefinition>,
}

impl SessionRegistry {
    pub fn new(definitions: Vec<SessionDefinition>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &[SessionDefinition] {
        &self.definitions
    }

    /// Check each definition on its own and against the ones before it.
    ///
    /// A definition is malformed if its window is unparsable or inverted, its
    /// name repeats an earlier one, or its window overlaps an earlier valid
    /// window.
    pub fn validate(&self) -> Vec<Result<&SessionDefinition, AppError>> {
        let mut accepted: Vec<(&SessionDefinition, NaiveTime, NaiveTime)> = Vec::new();
        let mut out = Vec::with_capacity(self.definitions.len());
        for def in &self.definitions {
            let checked = def.window().and_then(|(start, end)| {
                if accepted.iter().any(|(other, _, _)| other.name == def.name) {
                    return Err(AppError::InvalidSessionDefinition {
                        name: def.name.clone(),
                        reason: "name is already defined".to_string(),
                    });
                }
                if let Some((other, _, _)) = accepted
                    .iter()
                    .find(|(_, s, e)| start < *e && *s < end)
                {
                    return Err(AppError::InvalidSessionDefinition {
                        name: def.name.clone(),
                        reason: format!(
                            "{}-{} overlaps '{}' {}-{}",
                            def.start, def.end, other.name, other.start, other.end
                        ),
                    });
                }
                Ok((start, end))
            });
            match checked {
                Ok((start, end)) => {
                    accepted.push((def, start, end));
                    out.push(Ok(def));
                }
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    /// Create today's PENDING records. Safe to call any number of times:
    /// records that already exist are left exactly as they are.
    pub fn initialize_day(&self, store: &Store, date: NaiveDate, now: DateTime<Utc>) -> AppResult<DayInitReport> {
        let now_ms = now.timestamp_millis();
        let mut report = DayInitReport::default();
        for checked in self.validate() {
            let def = match checked {
                Ok(def) => def,
                Err(e) => {
                    tracing::error!(
                        trading_date = %date,
                        error = %e,
                        "Session definition rejected at day initialization"
                    );
                    let name = match &e {
                        AppError::InvalidSessionDefinition { name, .. } => name.clone(),
                        _ => String::new(),
                    };
                    report.failed.push((name, e));
                    continue;
                }
            };
            if store.insert_session_if_absent(date, def, now_ms)? {
                tracing::info!(trading_date = %date, session = %def.name, "Session initialized");
                report.created.push(def.name.clone());
            } else {
                report.existing.push(def.name.clone());
            }
        }
        Ok(report)
    }

    /// Sessions the monitor loop still has to advance.
    pub fn open_sessions(&self, store: &Store, date: NaiveDate) -> AppResult<Vec<SessionState>> {
        store.sessions_by_status(date, &[SessionStatus::Pending, SessionStatus::Active])
    }

    /// Completed sessions still waiting on a breakout decision.
    pub fn unchecked_completed(&self, store: &Store, date: NaiveDate) -> AppResult<Vec<SessionState>> {
        store.sessions_for_breakout_check(date)
    }
}
