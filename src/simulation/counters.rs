use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{floating_type_mod::FT, world::World};

#[derive(Clone)]
pub struct Counter<T> {
    values: Vec<T>,
    last_start: Instant,
}

impl<T> Counter<T> {
    fn new() -> Self {
        Counter::<T> {
            last_start: Instant::now(),
            values: Vec::new(),
        }
    }

    fn add_value(&mut self, v: T) {
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Counter<FT> {
    pub fn avg(&self) -> FT {
        if self.values.is_empty() {
            return 0.;
        }
        self.values.iter().cloned().sum::<FT>() / self.values.len() as FT
    }

    pub fn min(&self) -> FT {
        self.values.iter().cloned().fold(FT::MAX, FT::min)
    }

    pub fn max(&self) -> FT {
        self.values.iter().cloned().fold(FT::MIN, FT::max)
    }
}

impl Counter<Duration> {
    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.values.push(Instant::now() - self.last_start);
    }

    pub fn avg(&self) -> Duration {
        if self.values.is_empty() {
            return Duration::default();
        }
        self.values.iter().cloned().sum::<Duration>() / self.values.len() as u32
    }

    pub fn sum(&self) -> Duration {
        self.values.iter().cloned().sum::<Duration>()
    }
}

/// Scalar samples per label, e.g. the density error of every tick.
pub struct ValueCounters {
    counters: HashMap<String, Counter<FT>>,
    enabled: bool,
}

impl ValueCounters {
    pub fn new(enabled: bool) -> ValueCounters {
        ValueCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn add_value(&mut self, id: &str, v: FT) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<FT>::new)
                .add_value(v);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<FT>> {
        self.counters.get(id)
    }

    fn sorted(&self) -> Vec<(&String, &Counter<FT>)> {
        let mut v: Vec<_> = self.counters.iter().collect();
        v.sort_by(|x, y| x.0.cmp(y.0));
        v
    }
}

/// Wall clock durations per named stage of a tick.
pub struct PerformanceCounters {
    counters: HashMap<String, Counter<Duration>>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<Duration>::new)
                .begin();
        }
    }

    /// Ending a stage that was never begun is ignored.
    pub fn end(&mut self, id: &str) {
        if self.enabled {
            if let Some(counter) = self.counters.get_mut(id) {
                counter.end();
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<Duration>> {
        self.counters.get(id)
    }

    fn sorted(&self) -> Vec<(&String, &Counter<Duration>)> {
        let mut v: Vec<_> = self.counters.iter().collect();
        v.sort_by(|x, y| x.0.cmp(y.0));
        v
    }
}

/// Human readable summary of the counters collected by `world`. Empty sections if counters are disabled.
pub fn write_statistics(world: &World) -> String {
    let pcounters = world.performance_counters();
    let vcounters = world.value_counters();
    let mut s = String::new();

    let simulation_time = pcounters.get("simulation-step").map_or(0., |c| c.sum().as_secs_f64());
    s.push_str(&format!("simulation-time: {}ms\n", simulation_time * 1000.));
    s.push_str(&format!("ticks: {}\n\n", world.telemetry().ticks));

    for (label, pcounter) in pcounters.sorted() {
        s.push_str(&format!("{}: avg:{}ms\n", label, pcounter.avg().as_secs_f64() * 1000.));
    }
    s.push('\n');

    for (label, vcounter) in vcounters.sorted() {
        s.push_str(&format!(
            "{}: min:{} max:{} avg:{}\n",
            label,
            vcounter.min(),
            vcounter.max(),
            vcounter.avg()
        ));
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_counters_record_nothing() {
        let mut v = ValueCounters::new(false);
        v.add_value("density-error", 1.);
        assert!(v.get("density-error").is_none());

        let mut p = PerformanceCounters::new(false);
        p.begin("simulation-step");
        p.end("simulation-step");
        assert!(p.get("simulation-step").is_none());
    }

    #[test]
    fn value_statistics() {
        let mut v = ValueCounters::new(true);
        for x in &[1., 4., 2.5] {
            v.add_value("density-error", *x);
        }
        let c = v.get("density-error").unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.min(), 1.);
        assert_eq!(c.max(), 4.);
        crate::assert_ft_approx_eq(c.avg(), 2.5, 1e-6, || "avg".into());
    }

    #[test]
    fn statistics_summarize_a_run() {
        let params = crate::SimulationParams {
            counters_enabled: true,
            ..Default::default()
        };
        let mut world = World::new(params).unwrap();
        world.step(0.01);
        world.step(0.01);

        let s = write_statistics(&world);
        assert!(s.contains("ticks: 2\n"), "{}", s);
        assert!(s.contains("simulation-step: avg:"), "{}", s);
        assert!(s.contains("particle-count: min:0 max:0 avg:0"), "{}", s);
    }

    #[test]
    fn unmatched_end_is_ignored() {
        let mut p = PerformanceCounters::new(true);
        p.end("never-started");
        p.begin("stage");
        p.end("stage");
        assert_eq!(p.get("stage").unwrap().len(), 1);
    }
}
