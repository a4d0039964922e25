use std::fmt;
use std::str::FromStr;

use timeline::{CurveSpec, Point};

use crate::TransitionSettings;

/// Named presets that set intensity and the easing curve together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Clean,
    Dreamy,
    Gritty,
    Punchy,
}

impl Flavor {
    pub const ALL: [Flavor; 4] = [Flavor::Clean, Flavor::Dreamy, Flavor::Gritty, Flavor::Punchy];

    pub fn name(self) -> &'static str {
        match self {
            Flavor::Clean => "clean",
            Flavor::Dreamy => "dreamy",
            Flavor::Gritty => "gritty",
            Flavor::Punchy => "punchy",
        }
    }

    pub fn intensity(self) -> f64 {
        match self {
            Flavor::Clean => 1.0,
            Flavor::Dreamy => 1.6,
            Flavor::Gritty => 1.8,
            Flavor::Punchy => 2.0,
        }
    }

    pub fn curve(self) -> CurveSpec {
        let (c0x, c1x) = match self {
            Flavor::Clean => (0.4, 0.6),
            Flavor::Dreamy => (0.5, 0.5),
            Flavor::Gritty => (0.1, 0.9),
            Flavor::Punchy => (0.8, 0.2),
        };
        CurveSpec::new(
            Point::new(0.0, 0.0),
            Point::new(c0x, 0.0),
            Point::new(c1x, 1.0),
            Point::new(1.0, 1.0),
        )
    }

    pub fn apply(self, settings: &mut TransitionSettings) {
        settings.intensity = self.intensity();
        settings.set_curve(self.curve());
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Flavor::ALL
            .into_iter()
            .find(|flavor| flavor.name() == wanted)
            .ok_or_else(|| format!("unknown flavor '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeline::EasingSelection;

    #[test]
    fn clean_matches_default_curve() {
        assert_eq!(Flavor::Clean.curve(), CurveSpec::default());
    }

    #[test]
    fn apply_activates_curve() {
        let mut settings = TransitionSettings::default();
        "Punchy".parse::<Flavor>().unwrap().apply(&mut settings);
        assert_eq!(settings.intensity, 2.0);
        match settings.easing_selection() {
            EasingSelection::Curve(curve) => assert_eq!(curve.c0, Point::new(0.8, 0.0)),
            other => panic!("expected curve, got {other:?}"),
        }
        assert!("spicy".parse::<Flavor>().is_err());
    }
}
