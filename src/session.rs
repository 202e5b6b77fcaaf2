// Per-session control state and the update state machine

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::aggregate::{self, Order, Threshold, MAX_BINS};
use crate::chart::ChartSpec;
use crate::controls::{parse_control, ControlId, ControlValue};
use crate::dashboard::{affected_charts, build_chart, ChartId};
use crate::data::{Field, RecordTable};
use crate::error::{AggregateError, ParameterError};

pub type SessionId = u64;

pub const DEFAULT_BINS: usize = 20;
pub const DEFAULT_COUNTRIES: usize = 3;
pub const DEFAULT_CAPACITY: usize = 256;

/// Current value of every control for one viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlState {
    pub year_range: (i32, i32),
    pub frame_year: Option<i32>,
    pub countries: Vec<String>,
    pub bins: usize,
    pub threshold: Threshold,
    pub classification: Option<String>,
}

impl ControlState {
    /// Full year span, first frame, the most frequent countries.
    pub fn defaults(table: &RecordTable) -> Self {
        let countries = aggregate::category_count(table, Field::Country, Order::CountDesc)
            .map(|s| s.keys().into_iter().take(DEFAULT_COUNTRIES).collect())
            .unwrap_or_default();

        Self {
            year_range: table.year_bounds().unwrap_or((0, 0)),
            frame_year: aggregate::log_frames(table, Field::Classification)
                .ok()
                .and_then(|f| f.years.first().copied()),
            countries,
            bins: DEFAULT_BINS,
            threshold: Threshold::default(),
            classification: None,
        }
    }

    /// Validate and store `value`. On error `self` is left untouched.
    pub fn apply(&mut self, value: ControlValue) -> Result<(), ParameterError> {
        match value {
            ControlValue::YearRange(start, end) => {
                if start > end {
                    return Err(ParameterError::InvertedRange { start, end });
                }
                self.year_range = (start, end);
            }
            ControlValue::FrameYear(year) => self.frame_year = Some(year),
            ControlValue::Countries(countries) => {
                if countries.is_empty() {
                    return Err(ParameterError::EmptySelection);
                }
                self.countries = countries;
            }
            ControlValue::Bins(0) => return Err(ParameterError::ZeroBins),
            ControlValue::Bins(n) if n > MAX_BINS => return Err(ParameterError::TooManyBins(n, MAX_BINS)),
            ControlValue::Bins(n) => self.bins = n,
            ControlValue::Threshold(t) => self.threshold = t,
            ControlValue::Classification(c) => self.classification = c,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Updated,
    Unchanged,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartFailure {
    pub chart: ChartId,
    pub error: String,
}

/// Result of one control interaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    pub outcome: Outcome,
    pub charts: Vec<ChartSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChartFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    state: ControlState,
    charts: BTreeMap<ChartId, ChartSpec>,
    errors: BTreeMap<ChartId, String>,
}

impl Session {
    pub fn new(table: &RecordTable) -> Self {
        let state = ControlState::defaults(table);
        let mut charts = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for id in ChartId::ALL {
            match build_chart(table, id, &state) {
                Ok(spec) => {
                    charts.insert(id, spec);
                }
                Err(e) => {
                    debug!(chart = %id, error = %e, "chart unavailable");
                    errors.insert(id, e.to_string());
                }
            }
        }
        Self { state, charts, errors }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn chart(&self, id: ChartId) -> Option<&ChartSpec> {
        self.charts.get(&id)
    }

    /// Every chart in dashboard order.
    pub fn charts(&self) -> Vec<ChartSpec> {
        self.charts.values().cloned().collect()
    }

    /// Charts that could not be built for this dataset, with the reason.
    pub fn failures(&self) -> Vec<ChartFailure> {
        self.errors
            .iter()
            .map(|(&chart, error)| ChartFailure {
                chart,
                error: error.clone(),
            })
            .collect()
    }

    /// Apply one control value and rebuild the charts depending on it.
    pub fn handle(&mut self, table: &RecordTable, control: ControlId, raw: &Value) -> Update {
        let affected = affected_charts(control);

        let value = match parse_control(control, raw) {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(control = %control, "control unset, skipping update");
                return self.reply(Outcome::Unchanged, &affected, Vec::new(), None);
            }
            Err(e) => return self.reject(control, &affected, e),
        };

        let mut next = self.state.clone();
        if let Err(e) = next.apply(value) {
            return self.reject(control, &affected, e);
        }

        let mut built = Vec::with_capacity(affected.len());
        let mut failures = Vec::new();
        for &id in &affected {
            match build_chart(table, id, &next) {
                Ok(spec) => built.push((id, spec)),
                Err(AggregateError::Parameter(e)) => return self.reject(control, &affected, e),
                Err(e) => failures.push(ChartFailure {
                    chart: id,
                    error: e.to_string(),
                }),
            }
        }

        self.state = next;
        for (id, spec) in built {
            self.errors.remove(&id);
            self.charts.insert(id, spec);
        }
        debug!(control = %control, rebuilt = affected.len() - failures.len(), "control updated");
        self.reply(Outcome::Updated, &affected, failures, None)
    }

    fn reject(&self, control: ControlId, affected: &[ChartId], error: ParameterError) -> Update {
        warn!(control = %control, error = %error, "rejected control value");
        self.reply(Outcome::Rejected, affected, Vec::new(), Some(error.to_string()))
    }

    fn reply(&self, outcome: Outcome, affected: &[ChartId], errors: Vec<ChartFailure>, error: Option<String>) -> Update {
        Update {
            outcome,
            charts: affected.iter().filter_map(|id| self.charts.get(id).cloned()).collect(),
            errors,
            error,
        }
    }
}

/// All live sessions. The oldest is evicted once `capacity` is reached.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SessionStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Open a session with default controls and return its id.
    pub fn create(&self, table: &RecordTable) -> SessionId {
        let session = Session::new(table);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        while sessions.len() >= self.capacity {
            let Some(oldest) = sessions.keys().min().copied() else {
                break;
            };
            debug!(session = oldest, "evicting session");
            sessions.remove(&oldest);
        }
        sessions.insert(id, session);
        id
    }

    /// Run `f` against session `id`, if it is still live.
    pub fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(&id).map(f)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use serde_json::json;

    fn table() -> RecordTable {
        let mk = |gender: &str, country: &str, class: &str, year: i32, pages: f64| Record {
            gender: gender.to_string(),
            country: country.to_string(),
            classification: class.to_string(),
            year: Some(year),
            pages: Some(pages),
            grade: Some(2.5),
            ..Record::default()
        };
        RecordTable::new(
            vec![
                mk("Male", "France", "Painting", 2000, 100.0),
                mk("Female", "Italy", "Painting", 2001, 250.0),
                mk("Female", "France", "Sculpture", 2001, 400.0),
                mk("Male", "Peru", "Print", 2002, 90.0),
                mk("Male", "France", "Print", 2002, 310.0),
            ],
            Field::ALL,
            "books",
        )
    }

    #[test]
    fn test_defaults() {
        let state = ControlState::defaults(&table());
        assert_eq!(state.year_range, (2000, 2002));
        assert_eq!(state.frame_year, Some(2000));
        assert_eq!(state.bins, DEFAULT_BINS);
        assert_eq!(state.countries[0], "France");
        assert_eq!(state.countries.len(), 3);
    }

    #[test]
    fn test_apply_guards_leave_state_untouched() {
        let t = table();
        let mut state = ControlState::defaults(&t);
        let before = state.clone();
        assert_eq!(
            state.apply(ControlValue::YearRange(2005, 2000)),
            Err(ParameterError::InvertedRange { start: 2005, end: 2000 })
        );
        assert_eq!(state.apply(ControlValue::Bins(0)), Err(ParameterError::ZeroBins));
        assert!(state.apply(ControlValue::Bins(MAX_BINS + 1)).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_update_rebuilds_only_affected() {
        let t = table();
        let mut session = Session::new(&t);
        let untouched = session.chart(ChartId::GenderDistribution).cloned();

        let update = session.handle(&t, ControlId::Bins, &json!(5));
        assert_eq!(update.outcome, Outcome::Updated);
        assert_eq!(update.charts.len(), 1);
        assert_eq!(update.charts[0].id, "pages-histogram");
        assert_eq!(update.charts[0].traces[0].values.len(), 5);
        assert_eq!(session.state().bins, 5);
        assert_eq!(session.chart(ChartId::GenderDistribution).cloned(), untouched);
    }

    #[test]
    fn test_unset_value_is_a_no_op() {
        let t = table();
        let mut session = Session::new(&t);
        let before = session.state().clone();
        let update = session.handle(&t, ControlId::Countries, &Value::Null);
        assert_eq!(update.outcome, Outcome::Unchanged);
        assert_eq!(update.charts.len(), 1);
        assert_eq!(session.state(), &before);
    }

    #[test]
    fn test_rejected_value_keeps_previous_charts() {
        let t = table();
        let mut session = Session::new(&t);
        let previous = session.chart(ChartId::ClassificationInRange).cloned();

        let update = session.handle(&t, ControlId::YearRange, &json!([2002, 2000]));
        assert_eq!(update.outcome, Outcome::Rejected);
        assert!(update.error.is_some());
        assert_eq!(update.charts.first().cloned(), previous);
        assert_eq!(session.state().year_range, (2000, 2002));

        let update = session.handle(&t, ControlId::Threshold, &json!("mode"));
        assert_eq!(update.outcome, Outcome::Rejected);
        assert_eq!(session.state().threshold, Threshold::Mean);
    }

    #[test]
    fn test_frame_year_outside_data_keeps_current_frame() {
        let t = table();
        let mut session = Session::new(&t);

        let update = session.handle(&t, ControlId::FrameYear, &json!(2002));
        assert_eq!(update.outcome, Outcome::Updated);
        let shown = update.charts[0].clone();
        assert_eq!(shown.active_frame, Some(2));

        let update = session.handle(&t, ControlId::FrameYear, &json!(1800));
        assert_eq!(update.outcome, Outcome::Rejected);
        assert_eq!(update.charts[0], shown);
        assert_eq!(session.state().frame_year, Some(2002));
    }

    #[test]
    fn test_unknown_classification_is_rejected() {
        let t = table();
        let mut session = Session::new(&t);

        let update = session.handle(&t, ControlId::Classification, &json!("Tapestry"));
        assert_eq!(update.outcome, Outcome::Rejected);
        assert!(update.error.unwrap().contains("Tapestry"));
        assert_eq!(session.state().classification, None);

        let update = session.handle(&t, ControlId::Classification, &json!("Print"));
        assert_eq!(update.outcome, Outcome::Updated);
        assert_eq!(update.charts[0].traces[0].values.iter().sum::<f64>(), 2.0);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let t = table();
        let store = SessionStore::default();
        let a = store.create(&t);
        let b = store.create(&t);
        assert_ne!(a, b);

        store
            .with_session(a, |s| s.handle(&t, ControlId::YearRange, &json!("2001-2001")))
            .unwrap();
        let range_a = store.with_session(a, |s| s.state().year_range).unwrap();
        let range_b = store.with_session(b, |s| s.state().year_range).unwrap();
        assert_eq!(range_a, (2001, 2001));
        assert_eq!(range_b, (2000, 2002));
    }

    #[test]
    fn test_store_evicts_oldest() {
        let t = table();
        let store = SessionStore::with_capacity(2);
        let first = store.create(&t);
        store.create(&t);
        store.create(&t);
        assert_eq!(store.len(), 2);
        assert!(store.with_session(first, |_| ()).is_none());
    }

    #[test]
    fn test_missing_field_reported_per_chart() {
        let records = table().records().to_vec();
        let t = RecordTable::new(
            records,
            [Field::Gender, Field::Classification, Field::DateAcquired],
            "books",
        );
        let mut session = Session::new(&t);
        assert!(session.chart(ChartId::PagesHistogram).is_none());
        assert!(session.failures().iter().any(|f| f.chart == ChartId::PagesHistogram));

        let update = session.handle(&t, ControlId::Bins, &json!(10));
        assert_eq!(update.outcome, Outcome::Updated);
        assert!(update.charts.is_empty());
        assert_eq!(update.errors.len(), 1);
        assert_eq!(session.state().bins, 10);
    }
}
