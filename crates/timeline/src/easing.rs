use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown easing function '{0}'")]
pub struct UnknownEasing(pub String);

/// Closed-form easing functions addressed by their camelCase names
/// (`linear`, `easeInOutCubic`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Easing {
    #[default]
    Linear,
    InQuad,
    OutQuad,
    InOutQuad,
    InCubic,
    OutCubic,
    InOutCubic,
    InQuart,
    OutQuart,
    InOutQuart,
    InQuint,
    OutQuint,
    InOutQuint,
    InSine,
    OutSine,
    InOutSine,
    InExpo,
    OutExpo,
    InOutExpo,
    InCirc,
    OutCirc,
    InOutCirc,
    InBack,
    OutBack,
    InOutBack,
    InElastic,
    OutElastic,
    InOutElastic,
    InBounce,
    OutBounce,
    InOutBounce,
}

const BACK_C1: f64 = 1.70158;
const BACK_C2: f64 = BACK_C1 * 1.525;
const BACK_C3: f64 = BACK_C1 + 1.0;

impl Easing {
    pub const ALL: [Easing; 31] = [
        Easing::Linear,
        Easing::InQuad,
        Easing::OutQuad,
        Easing::InOutQuad,
        Easing::InCubic,
        Easing::OutCubic,
        Easing::InOutCubic,
        Easing::InQuart,
        Easing::OutQuart,
        Easing::InOutQuart,
        Easing::InQuint,
        Easing::OutQuint,
        Easing::InOutQuint,
        Easing::InSine,
        Easing::OutSine,
        Easing::InOutSine,
        Easing::InExpo,
        Easing::OutExpo,
        Easing::InOutExpo,
        Easing::InCirc,
        Easing::OutCirc,
        Easing::InOutCirc,
        Easing::InBack,
        Easing::OutBack,
        Easing::InOutBack,
        Easing::InElastic,
        Easing::OutElastic,
        Easing::InOutElastic,
        Easing::InBounce,
        Easing::OutBounce,
        Easing::InOutBounce,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Easing::Linear => "linear",
            Easing::InQuad => "easeInQuad",
            Easing::OutQuad => "easeOutQuad",
            Easing::InOutQuad => "easeInOutQuad",
            Easing::InCubic => "easeInCubic",
            Easing::OutCubic => "easeOutCubic",
            Easing::InOutCubic => "easeInOutCubic",
            Easing::InQuart => "easeInQuart",
            Easing::OutQuart => "easeOutQuart",
            Easing::InOutQuart => "easeInOutQuart",
            Easing::InQuint => "easeInQuint",
            Easing::OutQuint => "easeOutQuint",
            Easing::InOutQuint => "easeInOutQuint",
            Easing::InSine => "easeInSine",
            Easing::OutSine => "easeOutSine",
            Easing::InOutSine => "easeInOutSine",
            Easing::InExpo => "easeInExpo",
            Easing::OutExpo => "easeOutExpo",
            Easing::InOutExpo => "easeInOutExpo",
            Easing::InCirc => "easeInCirc",
            Easing::OutCirc => "easeOutCirc",
            Easing::InOutCirc => "easeInOutCirc",
            Easing::InBack => "easeInBack",
            Easing::OutBack => "easeOutBack",
            Easing::InOutBack => "easeInOutBack",
            Easing::InElastic => "easeInElastic",
            Easing::OutElastic => "easeOutElastic",
            Easing::InOutElastic => "easeInOutElastic",
            Easing::InBounce => "easeInBounce",
            Easing::OutBounce => "easeOutBounce",
            Easing::InOutBounce => "easeInOutBounce",
        }
    }

    /// Parses `name`, falling back to linear for anything unrecognised.
    pub fn from_name_or_linear(name: &str) -> Self {
        name.parse().unwrap_or_else(|err: UnknownEasing| {
            tracing::warn!(error = %err, "falling back to linear easing");
            Easing::Linear
        })
    }

    pub fn apply(self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::InQuad => t * t,
            Easing::OutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::InOutQuad => in_out_power(t, 2),
            Easing::InCubic => t.powi(3),
            Easing::OutCubic => 1.0 - (1.0 - t).powi(3),
            Easing::InOutCubic => in_out_power(t, 3),
            Easing::InQuart => t.powi(4),
            Easing::OutQuart => 1.0 - (1.0 - t).powi(4),
            Easing::InOutQuart => in_out_power(t, 4),
            Easing::InQuint => t.powi(5),
            Easing::OutQuint => 1.0 - (1.0 - t).powi(5),
            Easing::InOutQuint => in_out_power(t, 5),
            Easing::InSine => 1.0 - (t * PI / 2.0).cos(),
            Easing::OutSine => (t * PI / 2.0).sin(),
            Easing::InOutSine => -((PI * t).cos() - 1.0) / 2.0,
            Easing::InExpo => {
                if t == 0.0 {
                    0.0
                } else {
                    2f64.powf(10.0 * t - 10.0)
                }
            }
            Easing::OutExpo => {
                if t == 1.0 {
                    1.0
                } else {
                    1.0 - 2f64.powf(-10.0 * t)
                }
            }
            Easing::InOutExpo => {
                if t == 0.0 || t == 1.0 {
                    t
                } else if t < 0.5 {
                    2f64.powf(20.0 * t - 10.0) / 2.0
                } else {
                    (2.0 - 2f64.powf(-20.0 * t + 10.0)) / 2.0
                }
            }
            Easing::InCirc => 1.0 - (1.0 - t * t).sqrt(),
            Easing::OutCirc => (1.0 - (t - 1.0).powi(2)).sqrt(),
            Easing::InOutCirc => {
                if t < 0.5 {
                    (1.0 - (1.0 - (2.0 * t).powi(2)).sqrt()) / 2.0
                } else {
                    ((1.0 - (-2.0 * t + 2.0).powi(2)).sqrt() + 1.0) / 2.0
                }
            }
            Easing::InBack => BACK_C3 * t.powi(3) - BACK_C1 * t * t,
            Easing::OutBack => 1.0 + BACK_C3 * (t - 1.0).powi(3) + BACK_C1 * (t - 1.0).powi(2),
            Easing::InOutBack => {
                if t < 0.5 {
                    (2.0 * t).powi(2) * ((BACK_C2 + 1.0) * 2.0 * t - BACK_C2) / 2.0
                } else {
                    ((2.0 * t - 2.0).powi(2) * ((BACK_C2 + 1.0) * (t * 2.0 - 2.0) + BACK_C2) + 2.0)
                        / 2.0
                }
            }
            Easing::InElastic => {
                if t == 0.0 || t == 1.0 {
                    t
                } else {
                    let c4 = (2.0 * PI) / 3.0;
                    -(2f64.powf(10.0 * t - 10.0)) * ((t * 10.0 - 10.75) * c4).sin()
                }
            }
            Easing::OutElastic => {
                if t == 0.0 || t == 1.0 {
                    t
                } else {
                    let c4 = (2.0 * PI) / 3.0;
                    2f64.powf(-10.0 * t) * ((t * 10.0 - 0.75) * c4).sin() + 1.0
                }
            }
            Easing::InOutElastic => {
                if t == 0.0 || t == 1.0 {
                    t
                } else {
                    let c5 = (2.0 * PI) / 4.5;
                    let wave = ((20.0 * t - 11.125) * c5).sin();
                    if t < 0.5 {
                        -(2f64.powf(20.0 * t - 10.0) * wave) / 2.0
                    } else {
                        2f64.powf(-20.0 * t + 10.0) * wave / 2.0 + 1.0
                    }
                }
            }
            Easing::InBounce => 1.0 - bounce_out(1.0 - t),
            Easing::OutBounce => bounce_out(t),
            Easing::InOutBounce => {
                if t < 0.5 {
                    (1.0 - bounce_out(1.0 - 2.0 * t)) / 2.0
                } else {
                    (1.0 + bounce_out(2.0 * t - 1.0)) / 2.0
                }
            }
        }
    }
}

fn in_out_power(t: f64, power: i32) -> f64 {
    if t < 0.5 {
        2f64.powi(power - 1) * t.powi(power)
    } else {
        1.0 - (-2.0 * t + 2.0).powi(power) / 2.0
    }
}

fn bounce_out(t: f64) -> f64 {
    const N1: f64 = 7.5625;
    const D1: f64 = 2.75;
    if t < 1.0 / D1 {
        N1 * t * t
    } else if t < 2.0 / D1 {
        let t = t - 1.5 / D1;
        N1 * t * t + 0.75
    } else if t < 2.5 / D1 {
        let t = t - 2.25 / D1;
        N1 * t * t + 0.9375
    } else {
        let t = t - 2.625 / D1;
        N1 * t * t + 0.984375
    }
}

impl FromStr for Easing {
    type Err = UnknownEasing;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Easing::ALL
            .iter()
            .copied()
            .find(|easing| easing.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownEasing(trimmed.to_string()))
    }
}

impl TryFrom<String> for Easing {
    type Error = UnknownEasing;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Easing> for String {
    fn from(value: Easing) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_easing_is_pinned_at_endpoints() {
        for easing in Easing::ALL {
            assert!(easing.apply(0.0).abs() < 1e-9, "{easing} at 0");
            assert!((easing.apply(1.0) - 1.0).abs() < 1e-9, "{easing} at 1");
        }
    }

    #[test]
    fn names_round_trip_through_parse() {
        for easing in Easing::ALL {
            assert_eq!(easing.name().parse::<Easing>(), Ok(easing));
        }
        assert_eq!("EASEINOUTCUBIC".parse::<Easing>(), Ok(Easing::InOutCubic));
    }

    #[test]
    fn unknown_names_fall_back_to_linear() {
        assert_eq!(Easing::from_name_or_linear("wobble"), Easing::Linear);
        assert!("wobble".parse::<Easing>().is_err());
    }

    #[test]
    fn in_out_cubic_is_symmetric() {
        let easing = Easing::InOutCubic;
        assert!((easing.apply(0.5) - 0.5).abs() < 1e-9);
        assert!((easing.apply(0.25) + easing.apply(0.75) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn back_easing_overshoots() {
        assert!(Easing::InBack.apply(0.2) < 0.0);
        assert!(Easing::OutBack.apply(0.8) > 1.0);
    }
}
