//! Per-query stopwatches.
//!
//! Each pipeline run owns its own `Timers`; nothing here is shared between
//! queries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Duration of one named pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub name: String,
    pub millis: f64,
}

/// Full timing report attached to responses and failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingReport {
    /// Wall time of the whole run, if the overall timer was stopped.
    pub overall_millis: Option<f64>,
    pub steps: Vec<StepTiming>,
    /// Measurements reported by the protocol service, in milliseconds.
    pub protocol: BTreeMap<String, f64>,
}

impl TimingReport {
    #[cfg(test)]
    pub fn step(&self, name: &str) -> Option<f64> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.millis)
    }
}

#[derive(Debug, Default)]
pub struct Timers {
    overall_start: Option<Instant>,
    overall: Option<Duration>,
    current: Option<(String, Instant)>,
    steps: Vec<(String, Duration)>,
    additional: BTreeMap<String, f64>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_overall(&mut self) {
        self.overall_start = Some(Instant::now());
        self.overall = None;
    }

    pub fn stop_overall(&mut self) {
        if let Some(start) = self.overall_start.take() {
            self.overall = Some(start.elapsed());
        }
    }

    /// Start a named step, closing the running one if any.
    pub fn start_step(&mut self, name: &str) {
        if let Some((running, _)) = &self.current {
            warn!("Step '{}' still running when '{}' started", running, name);
            self.stop_step();
        }
        self.current = Some((name.to_string(), Instant::now()));
    }

    pub fn stop_step(&mut self) {
        if let Some((name, start)) = self.current.take() {
            self.steps.push((name, start.elapsed()));
        }
    }

    /// Merge measurements reported by an external protocol run.
    pub fn add_additional(&mut self, measurements: &BTreeMap<String, f64>) {
        for (name, millis) in measurements {
            *self.additional.entry(name.clone()).or_insert(0.0) += millis;
        }
    }

    /// Snapshot of everything measured so far. A step still running is
    /// reported with its elapsed time.
    pub fn generate_report(&self) -> TimingReport {
        let mut steps: Vec<StepTiming> = self
            .steps
            .iter()
            .map(|(name, d)| StepTiming {
                name: name.clone(),
                millis: to_millis(*d),
            })
            .collect();

        if let Some((name, start)) = &self.current {
            steps.push(StepTiming {
                name: name.clone(),
                millis: to_millis(start.elapsed()),
            });
        }

        TimingReport {
            overall_millis: self
                .overall
                .or_else(|| self.overall_start.map(|s| s.elapsed()))
                .map(to_millis),
            steps,
            protocol: self.additional.clone(),
        }
    }
}

fn to_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_recorded_in_order() {
        let mut timers = Timers::new();
        timers.start_overall();
        timers.start_step("first");
        timers.stop_step();
        timers.start_step("second");
        timers.stop_step();
        timers.stop_overall();

        let report = timers.generate_report();
        let names: Vec<_> = report.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(report.overall_millis.is_some());
    }

    #[test]
    fn test_starting_step_closes_running_one() {
        let mut timers = Timers::new();
        timers.start_step("a");
        timers.start_step("b");

        let report = timers.generate_report();
        assert_eq!(report.steps.len(), 2);
        assert!(report.step("a").is_some());
        assert!(report.step("b").is_some());
    }

    #[test]
    fn test_additional_measurements_accumulate() {
        let mut timers = Timers::new();
        let mut m = BTreeMap::new();
        m.insert("DDTRequest".to_string(), 10.0);
        timers.add_additional(&m);
        timers.add_additional(&m);

        let report = timers.generate_report();
        assert_eq!(report.protocol.get("DDTRequest"), Some(&20.0));
    }

    #[test]
    fn test_fresh_timers_report_nothing() {
        let report = Timers::new().generate_report();
        assert_eq!(report, TimingReport::default());
    }
}
