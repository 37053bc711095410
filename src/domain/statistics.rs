//! Running statistics and chart buffers fed by completed trackpoints.

use crate::domain::trace::Trackpoint;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    Respiration,
    CoreTemperature,
    SkinTemperature,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::HeartRate,
        Metric::Respiration,
        Metric::CoreTemperature,
        Metric::SkinTemperature,
    ];

    pub fn value(self, trackpoint: &Trackpoint) -> Option<f64> {
        match self {
            Self::HeartRate => trackpoint.hr_val.map(f64::from),
            Self::Respiration => trackpoint.rr_val.map(f64::from),
            Self::CoreTemperature => trackpoint.temp_core,
            Self::SkinTemperature => trackpoint.temp_skin,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::HeartRate => 0,
            Self::Respiration => 1,
            Self::CoreTemperature => 2,
            Self::SkinTemperature => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStatistic {
    pub sum: f64,
    pub count: u64,
}

impl RunningStatistic {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Defined only once at least one value was added.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStatistics {
    metrics: [RunningStatistic; 4],
}

impl SessionStatistics {
    /// Add every metric present in the trackpoint.
    pub fn update(&mut self, trackpoint: &Trackpoint) {
        for metric in Metric::ALL {
            if let Some(value) = metric.value(trackpoint) {
                self.metrics[metric.index()].add(value);
            }
        }
    }

    pub fn get(&self, metric: Metric) -> &RunningStatistic {
        &self.metrics[metric.index()]
    }

    pub fn average(&self, metric: Metric) -> Option<f64> {
        self.get(metric).average()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.iter().all(|m| m.count == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only time series per metric.
///
/// Growth is unbounded for the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartBuffers {
    series: [Vec<ChartPoint>; 4],
}

impl ChartBuffers {
    /// Append each present metric; nothing is appended without a sample time.
    pub fn append(&mut self, trackpoint: &Trackpoint) -> Vec<(Metric, ChartPoint)> {
        let Some(timestamp) = trackpoint.timestamp else {
            return Vec::new();
        };

        let mut appended = Vec::new();
        for metric in Metric::ALL {
            if let Some(value) = metric.value(trackpoint) {
                let point = ChartPoint { value, timestamp };
                self.series[metric.index()].push(point);
                appended.push((metric, point));
            }
        }
        appended
    }

    pub fn series(&self, metric: Metric) -> &[ChartPoint] {
        &self.series[metric.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(Vec::is_empty)
    }
}

/// What one trackpoint changed, broadcast to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveUpdate {
    pub trackpoint: Trackpoint,
    pub statistics: SessionStatistics,
    pub appended: Vec<(Metric, ChartPoint)>,
}

/// Statistics and chart buffers of the running session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveMetrics {
    pub statistics: SessionStatistics,
    pub buffers: ChartBuffers,
}

impl LiveMetrics {
    pub fn ingest(&mut self, trackpoint: Trackpoint) -> LiveUpdate {
        self.statistics.update(&trackpoint);
        let appended = self.buffers.append(&trackpoint);
        LiveUpdate {
            trackpoint,
            statistics: self.statistics.clone(),
            appended,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty() && self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trackpoint(hr: Option<u8>, core: Option<f64>, at: Option<i64>) -> Trackpoint {
        Trackpoint {
            timestamp: at.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            hr_val: hr,
            temp_core: core,
            ..Trackpoint::default()
        }
    }

    #[test]
    fn test_running_average() {
        let mut stats = SessionStatistics::default();
        assert_eq!(stats.average(Metric::HeartRate), None);

        let mut averages = Vec::new();
        for hr in [60, 70, 80] {
            stats.update(&trackpoint(Some(hr), None, Some(1)));
            averages.push(stats.average(Metric::HeartRate).unwrap());
        }

        assert_eq!(averages[0], 60.0);
        assert_eq!(averages[1], 65.0);
        assert_eq!(averages[2], 70.0);
        assert_eq!(stats.get(Metric::HeartRate).count, 3);
    }

    #[test]
    fn test_absent_metrics_leave_statistics_untouched() {
        let mut stats = SessionStatistics::default();
        stats.update(&trackpoint(Some(60), Some(37.2), Some(1)));
        stats.update(&trackpoint(None, Some(37.6), Some(2)));

        assert_eq!(stats.get(Metric::HeartRate).count, 1);
        assert_eq!(stats.get(Metric::CoreTemperature).count, 2);
        assert!((stats.average(Metric::CoreTemperature).unwrap() - 37.4).abs() < 1e-9);
        assert_eq!(stats.average(Metric::Respiration), None);
        assert_eq!(stats.average(Metric::SkinTemperature), None);
    }

    #[test]
    fn test_buffers_append_in_order() {
        let mut buffers = ChartBuffers::default();
        buffers.append(&trackpoint(Some(60), None, Some(10)));
        let appended = buffers.append(&trackpoint(Some(61), Some(36.9), Some(11)));

        assert_eq!(appended.len(), 2);
        let series = buffers.series(Metric::HeartRate);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].value, 60.0);
        assert_eq!(series[1].timestamp, DateTime::from_timestamp(11, 0).unwrap());
        assert_eq!(buffers.series(Metric::CoreTemperature).len(), 1);
    }

    #[test]
    fn test_missing_timestamp_suppresses_append() {
        let mut buffers = ChartBuffers::default();
        let appended = buffers.append(&trackpoint(Some(60), Some(37.0), None));
        assert!(appended.is_empty());
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_live_metrics_reset() {
        let mut live = LiveMetrics::default();
        let update = live.ingest(trackpoint(Some(75), None, Some(5)));
        assert_eq!(update.statistics.average(Metric::HeartRate), Some(75.0));
        assert!(!live.is_empty());

        live.reset();
        assert!(live.is_empty());
        for metric in Metric::ALL {
            assert_eq!(live.statistics.average(metric), None);
        }
    }
}
