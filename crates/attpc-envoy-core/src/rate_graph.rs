//! Rolling data-rate history for each DataRouter.
//!
//! Each graph is a bounded ring of points. When full, the oldest point is
//! dropped for the new one, so the history scrolls like a ticker tape.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateGraph {
    points: VecDeque<f64>,
    max_points: usize,
    name: String,
}

impl RateGraph {
    pub fn new(name: &str, max_points: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(max_points),
            max_points,
            name: String::from(name),
        }
    }

    pub fn add_point(&mut self, rate: f64) {
        if self.max_points == 0 {
            return;
        }
        if self.points.len() == self.max_points {
            self.points.pop_front();
        }
        self.points.push_back(rate);
    }

    /// Pair the points with their time stamps, oldest first
    pub fn line(&self, times: &VecDeque<f64>) -> Vec<[f64; 2]> {
        times
            .iter()
            .zip(self.points.iter())
            .map(|(time, rate)| [*time, *rate])
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> &VecDeque<f64> {
        &self.points
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }

    /// Change the capacity. Existing points are dropped.
    pub fn change_max_points(&mut self, max_points: usize) {
        self.max_points = max_points;
        self.reset();
    }
}

/// One rate graph per DataRouter, sharing a time axis
#[derive(Debug)]
pub struct GraphManager {
    graphs: Vec<RateGraph>,
    max_points: usize,
    time_points: VecDeque<f64>,
    update_interval: Duration,
    last_update_time: Instant,
    start_time: Instant,
}

impl GraphManager {
    pub fn new(n_graphs: usize, max_points: usize, update_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            graphs: (0..n_graphs)
                .map(|i| RateGraph::new(&format!("router_{i}"), max_points))
                .collect(),
            max_points,
            time_points: VecDeque::with_capacity(max_points),
            update_interval,
            last_update_time: now,
            start_time: now,
        }
    }

    /// Has a full interval passed since the last point
    pub fn should_update(&self) -> bool {
        self.last_update_time.elapsed() >= self.update_interval
    }

    /// Record one rate per graph at the current time
    pub fn update(&mut self, rates: &[f64]) {
        if self.max_points == 0 {
            return;
        }
        self.last_update_time = Instant::now();
        let elapsed = self.last_update_time - self.start_time;
        if self.time_points.len() == self.max_points {
            self.time_points.pop_front();
        }
        self.time_points.push_back(elapsed.as_secs_f64());
        for (graph, rate) in self.graphs.iter_mut().zip(rates.iter()) {
            graph.add_point(*rate);
        }
    }

    /// `(name, points)` for every graph
    pub fn lines(&self) -> Vec<(String, Vec<[f64; 2]>)> {
        self.graphs
            .iter()
            .map(|g| (g.name().to_string(), g.line(&self.time_points)))
            .collect()
    }

    pub fn reset(&mut self) {
        self.start_time = Instant::now();
        self.last_update_time = self.start_time;
        self.time_points.clear();
        for graph in self.graphs.iter_mut() {
            graph.reset();
        }
    }

    /// Change the capacity of every graph. This resets the history.
    pub fn set_max_points(&mut self, max_points: usize) {
        self.max_points = max_points;
        for graph in self.graphs.iter_mut() {
            graph.change_max_points(max_points);
        }
        self.reset();
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let mut graph = RateGraph::new("router_0", 3);
        for r in [1.0, 2.0, 3.0, 4.0] {
            graph.add_point(r);
        }
        assert_eq!(graph.points().iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        graph.change_max_points(2);
        assert!(graph.points().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_gates_on_interval() {
        let mut graphs = GraphManager::new(2, 3, Duration::from_secs(2));
        assert!(!graphs.should_update());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(graphs.should_update());
        graphs.update(&[1.0, 10.0]);
        assert!(!graphs.should_update());

        tokio::time::advance(Duration::from_secs(2)).await;
        graphs.update(&[2.0, 20.0]);

        let lines = graphs.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].0, "router_1");
        assert_eq!(lines[1].1, vec![[2.0, 10.0], [4.0, 20.0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_time_axis_is_bounded() {
        let mut graphs = GraphManager::new(1, 2, Duration::from_secs(1));
        for i in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            graphs.update(&[i as f64]);
        }
        let (_, line) = &graphs.lines()[0];
        assert_eq!(line, &vec![[4.0, 3.0], [5.0, 4.0]]);

        graphs.set_max_points(4);
        assert!(graphs.lines()[0].1.is_empty());
        assert_eq!(graphs.max_points(), 4);
    }
}
