//! Plateau detection over the per-epoch validation error.
//!
//! The detector keeps two adjacent windows of the most recent epoch errors:
//! the `current` window holds the last `window_size` values, and values
//! pushed out of it move into the `previous` window of the same size.
//! Training is considered converged when
//!
//! - the current average has at some point stopped improving on the previous
//!   one, and this epoch's error is lower than the last epoch's (a local
//!   minimum after the plateau), or
//! - the two averages are equal within a tolerance (a flat plateau).

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct PlateauDetector {
    window_size: usize,
    tolerance: f64,
    current: VecDeque<f64>,
    previous: VecDeque<f64>,
    plateau_passed: bool,
    last_error: f64,
}

impl PlateauDetector {
    /// # Panics
    ///
    /// Panics if `window_size` is zero.
    #[must_use]
    pub fn new(window_size: usize, tolerance: f64) -> Self {
        assert!(window_size > 0, "plateau window must not be empty");
        Self {
            window_size,
            tolerance,
            current: VecDeque::with_capacity(window_size + 1),
            previous: VecDeque::with_capacity(window_size + 1),
            plateau_passed: false,
            last_error: f64::INFINITY,
        }
    }

    /// Records the error of one epoch and reports whether training has
    /// converged.
    pub fn record(&mut self, error: f64) -> bool {
        self.current.push_back(error);
        if self.current.len() > self.window_size
            && let Some(oldest) = self.current.pop_front()
        {
            self.previous.push_back(oldest);
            if self.previous.len() > self.window_size {
                self.previous.pop_front();
            }
        }

        let current = self.current_average();
        let previous = self.previous_average();
        if current >= previous {
            self.plateau_passed = true;
        }
        let improved = error < self.last_error;
        self.last_error = error;

        (self.plateau_passed && improved) || (current - previous).abs() <= self.tolerance
    }

    /// Mean of the current window.
    #[must_use]
    pub fn current_average(&self) -> f64 {
        mean(&self.current).unwrap_or(f64::INFINITY)
    }

    /// Mean of the previous window; infinite while it is empty.
    #[must_use]
    pub fn previous_average(&self) -> f64 {
        mean(&self.previous).unwrap_or(f64::INFINITY)
    }

    #[must_use]
    pub fn plateau_passed(&self) -> bool {
        self.plateau_passed
    }
}

#[expect(clippy::cast_precision_loss)]
fn mean(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stop(detector: &mut PlateauDetector, errors: &[f64]) -> Option<usize> {
        errors.iter().position(|&e| detector.record(e))
    }

    #[test]
    fn test_decrease_then_flat_stops_deterministically() {
        let errors = [1.0, 0.75, 0.625, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
        let mut detector = PlateauDetector::new(2, 0.0);
        assert_eq!(first_stop(&mut detector, &errors), Some(6));
        assert!(detector.plateau_passed());

        let mut again = PlateauDetector::new(2, 0.0);
        assert_eq!(first_stop(&mut again, &errors), Some(6));
    }

    #[test]
    fn test_previous_window_starts_infinite() {
        let mut detector = PlateauDetector::new(3, 0.0);
        assert!(!detector.record(0.5));
        assert!(detector.previous_average().is_infinite());
        assert_eq!(detector.current_average(), 0.5);
    }

    #[test]
    fn test_stops_on_improvement_after_plateau() {
        let mut detector = PlateauDetector::new(1, 0.0);
        assert!(!detector.record(1.0));
        assert!(!detector.record(0.5));
        // worse than the previous window: plateau passed, no improvement yet
        assert!(!detector.record(0.75));
        assert!(detector.plateau_passed());
        assert!(detector.record(0.625));
    }

    #[test]
    fn test_tolerance_counts_near_equal_averages_as_flat() {
        let errors = [1.0, 0.9, 0.89];
        let mut strict = PlateauDetector::new(1, 0.0);
        assert_eq!(first_stop(&mut strict, &errors), None);
        let mut tolerant = PlateauDetector::new(1, 0.02);
        assert_eq!(first_stop(&mut tolerant, &errors), Some(2));
    }

    #[test]
    fn test_steady_improvement_never_stops() {
        let errors = (0..100).map(|i| 1.0 / f64::from(i + 1)).collect::<Vec<_>>();
        let mut detector = PlateauDetector::new(5, 0.0);
        assert_eq!(first_stop(&mut detector, &errors), None);
    }
}
