use crate::constants::ROUNDTRIP_CLOSURE_TOLERANCE_M;
use crate::error::{AppError, Result};
use crate::models::{EndpointMode, ExperienceLimit, GeneratedRoute, RouteConstraints};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    DistanceExceeded {
        distance_m: f64,
        max_distance_m: f64,
    },
    ExperienceTimeExceeded {
        experience_time_s: f64,
        max_experience_s: f64,
    },
    SpacingViolated {
        first: String,
        second: String,
        distance_m: f64,
        minimum_m: f64,
    },
    OpenRoundtrip {
        gap_m: f64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DistanceExceeded {
                distance_m,
                max_distance_m,
            } => write!(f, "distance {:.0}m exceeds {:.0}m", distance_m, max_distance_m),
            Violation::ExperienceTimeExceeded {
                experience_time_s,
                max_experience_s,
            } => write!(
                f,
                "experience time {:.0}min exceeds {:.0}min",
                experience_time_s / 60.0,
                max_experience_s / 60.0
            ),
            Violation::SpacingViolated {
                first,
                second,
                distance_m,
                minimum_m,
            } => write!(
                f,
                "'{}' and '{}' are {:.0}m apart (minimum {:.0}m)",
                first, second, distance_m, minimum_m
            ),
            Violation::OpenRoundtrip { gap_m } => {
                write!(f, "roundtrip ends {:.0}m away from its start", gap_m)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn exceeds_budget(&self) -> bool {
        self.violations.iter().any(|v| {
            matches!(
                v,
                Violation::DistanceExceeded { .. } | Violation::ExperienceTimeExceeded { .. }
            )
        })
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        let summary = self
            .violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(AppError::ConstraintViolation(summary))
    }
}

/// Checks a route against its budgets. Reports, never corrects.
pub struct RouteValidator;

impl RouteValidator {
    pub fn validate(route: &GeneratedRoute, constraints: &RouteConstraints) -> ValidationReport {
        let mut violations = Vec::new();
        let totals = route.totals();

        if let Some(max) = constraints.max_distance_m {
            if totals.distance_m > max {
                violations.push(Violation::DistanceExceeded {
                    distance_m: totals.distance_m,
                    max_distance_m: max,
                });
            }
        }

        if let ExperienceLimit::Max { minutes } = constraints.max_experience {
            let max_s = minutes as f64 * 60.0;
            if totals.experience_time_s > max_s {
                violations.push(Violation::ExperienceTimeExceeded {
                    experience_time_s: totals.experience_time_s,
                    max_experience_s: max_s,
                });
            }
        }

        if let Some(minimum) = constraints.min_spacing_m {
            let stops = route.stops();
            for (i, a) in stops.iter().enumerate() {
                for b in &stops[i + 1..] {
                    let d = a.coordinates.distance_m(&b.coordinates);
                    if d < minimum {
                        violations.push(Violation::SpacingViolated {
                            first: a.name.clone(),
                            second: b.name.clone(),
                            distance_m: d,
                            minimum_m: minimum,
                        });
                    }
                }
            }
        }

        if route.endpoint_mode() == EndpointMode::Roundtrip {
            let gap_m = route.start().coordinates.distance_m(&route.last().coordinates);
            if gap_m > ROUNDTRIP_CLOSURE_TOLERANCE_M {
                violations.push(Violation::OpenRoundtrip { gap_m });
            }
        }

        if !violations.is_empty() {
            tracing::debug!(
                route_id = %route.id(),
                violations = violations.len(),
                "Route {} has {} constraint violations",
                route.id(),
                violations.len()
            );
        }

        ValidationReport { violations }
    }
}
