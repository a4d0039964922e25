use serde::{Deserialize, Serialize};

use crate::easing::Easing;

const NEWTON_ITERATIONS: usize = 20;
const DERIVATIVE_EPSILON: f64 = 1e-6;
const SOLVE_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Cubic Bézier easing: x is linear progress, y the eased value.
///
/// Endpoints are pinned at x=0 and x=1; control points may leave the unit
/// square to produce overshoot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveSpec {
    pub p0: Point,
    pub c0: Point,
    pub c1: Point,
    pub p1: Point,
}

impl Default for CurveSpec {
    fn default() -> Self {
        Self {
            p0: Point::new(0.0, 0.0),
            c0: Point::new(0.4, 0.0),
            c1: Point::new(0.6, 1.0),
            p1: Point::new(1.0, 1.0),
        }
    }
}

impl CurveSpec {
    pub const LINEAR: CurveSpec = CurveSpec {
        p0: Point::new(0.0, 0.0),
        c0: Point::new(1.0 / 3.0, 1.0 / 3.0),
        c1: Point::new(2.0 / 3.0, 2.0 / 3.0),
        p1: Point::new(1.0, 1.0),
    };

    pub fn new(p0: Point, c0: Point, c1: Point, p1: Point) -> Self {
        Self {
            p0: Point::new(0.0, p0.y),
            c0,
            c1,
            p1: Point::new(1.0, p1.y),
        }
    }

    fn is_diagonal(&self) -> bool {
        [self.p0, self.c0, self.c1, self.p1]
            .iter()
            .all(|point| point.x == point.y)
    }

    /// Solves `x(t) = x` with Newton-Raphson and returns `y(t)`.
    pub fn y_for_x(&self, x: f64) -> f64 {
        if x <= self.p0.x {
            return self.p0.y;
        }
        if x >= self.p1.x {
            return self.p1.y;
        }
        if self.is_diagonal() {
            return x;
        }

        let (x0, x1, x2, x3) = (self.p0.x, self.c0.x, self.c1.x, self.p1.x);
        let mut t = x;
        for _ in 0..NEWTON_ITERATIONS {
            let current = cubic(t, x0, x1, x2, x3);
            let slope = cubic_derivative(t, x0, x1, x2, x3);
            if slope.abs() < DERIVATIVE_EPSILON {
                break;
            }
            let diff = current - x;
            if diff.abs() < SOLVE_EPSILON {
                break;
            }
            t -= diff / slope;
        }

        let t = t.clamp(0.0, 1.0);
        cubic(t, self.p0.y, self.c0.y, self.c1.y, self.p1.y)
    }
}

fn cubic(t: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    let mt = 1.0 - t;
    mt * mt * mt * a + 3.0 * mt * mt * t * b + 3.0 * mt * t * t * c + t * t * t * d
}

fn cubic_derivative(t: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    let mt = 1.0 - t;
    3.0 * mt * mt * (b - a) + 6.0 * mt * t * (c - b) + 3.0 * t * t * (d - c)
}

/// The active easing selector. Only one of the two is consulted per
/// evaluation; callers pick the curve whenever one is configured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EasingSelection {
    Named(Easing),
    Curve(CurveSpec),
}

impl Default for EasingSelection {
    fn default() -> Self {
        EasingSelection::Named(Easing::Linear)
    }
}

impl EasingSelection {
    pub fn evaluate(&self, linear_t: f64) -> f64 {
        evaluate_curve(linear_t, self)
    }
}

/// Maps linear progress to eased progress. Overshoot is returned unclamped.
pub fn evaluate_curve(linear_t: f64, selection: &EasingSelection) -> f64 {
    match selection {
        EasingSelection::Named(easing) => easing.apply(linear_t),
        EasingSelection::Curve(curve) => curve.y_for_x(linear_t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_endpoints_are_exact() {
        let curves = [
            CurveSpec::default(),
            CurveSpec::new(
                Point::new(0.0, 0.0),
                Point::new(0.9, -0.4),
                Point::new(0.1, 1.6),
                Point::new(1.0, 1.0),
            ),
        ];
        for curve in curves {
            let selection = EasingSelection::Curve(curve);
            assert_eq!(evaluate_curve(0.0, &selection), 0.0);
            assert_eq!(evaluate_curve(1.0, &selection), 1.0);
        }
    }

    #[test]
    fn linear_easing_is_identity() {
        let selection = EasingSelection::Named(Easing::Linear);
        for t in [0.0, 0.25, 0.5, 0.75, 1.0] {
            assert_eq!(evaluate_curve(t, &selection), t);
        }
    }

    #[test]
    fn diagonal_curve_takes_identity_path() {
        let selection = EasingSelection::Curve(CurveSpec::LINEAR);
        for t in [0.1, 0.3, 0.65, 0.9] {
            assert_eq!(evaluate_curve(t, &selection), t);
        }
    }

    #[test]
    fn ease_in_out_curve_is_monotonic() {
        let curve = CurveSpec::default();
        let mut last = 0.0;
        for step in 1..=20 {
            let value = curve.y_for_x(step as f64 / 20.0);
            assert!(value >= last - 1e-6);
            last = value;
        }
        assert!((curve.y_for_x(0.5) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn overshooting_curve_is_not_clamped() {
        let curve = CurveSpec::new(
            Point::new(0.0, 0.0),
            Point::new(0.3, 0.0),
            Point::new(0.5, 1.8),
            Point::new(1.0, 1.0),
        );
        let peak = (1..20)
            .map(|step| curve.y_for_x(step as f64 / 20.0))
            .fold(f64::MIN, f64::max);
        assert!(peak > 1.0);
    }

    #[test]
    fn constructor_pins_endpoint_x() {
        let curve = CurveSpec::new(
            Point::new(0.3, 0.0),
            Point::new(0.4, 0.0),
            Point::new(0.6, 1.0),
            Point::new(0.7, 1.0),
        );
        assert_eq!(curve.p0.x, 0.0);
        assert_eq!(curve.p1.x, 1.0);
    }
}
