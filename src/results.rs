//! Reading fit parameters back out of a GALFIT output header.
//!
//! GALFIT writes each parameter as `<component>_<PARAM>` in the header of the
//! model HDU. Free parameters are `"value +/- uncertainty"`, values GALFIT
//! considers unreliable are wrapped in asterisks, and parameters held fixed
//! are bracketed.

use tracing::warn;

use crate::error::ResultsError;
use crate::fits::{Card, Header};

/// HDU of the GALFIT image block holding the best-fit model and its header.
pub const MODEL_HDU: usize = 2;

/// Fit-quality keywords read ahead of the components.
pub const STATISTICS: [&str; 5] = ["CHISQ", "NDOF", "NFREE", "NFIX", "CHI2NU"];

/// Highest component number looked for.
const MAX_COMPONENTS: usize = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FitFlag {
    Free = 0,
    Fixed = 1,
    Problematic = 2,
    /// Missing keyword, or a plain number without an uncertainty.
    Unset = 99,
}

impl FitFlag {
    pub fn code(self) -> f64 {
        f64::from(self as u8)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitValue {
    pub value: f64,
    pub uncertainty: f64,
    pub flag: FitFlag,
}

impl FitValue {
    pub fn missing() -> Self {
        Self {
            value: f64::NAN,
            uncertainty: f64::NAN,
            flag: FitFlag::Unset,
        }
    }

    pub fn as_triple(&self) -> [f64; 3] {
        [self.value, self.uncertainty, self.flag.code()]
    }
}

fn number(raw: &str, token: &str) -> Result<f64, ResultsError> {
    token.trim().parse::<f64>().map_err(|_| ResultsError::BadNumber {
        raw: raw.to_string(),
        token: token.trim().to_string(),
    })
}

/// Strip the asterisks GALFIT puts around a problematic number.
fn unstar(token: &str) -> &str {
    let t = token.trim();
    t.strip_prefix('*')
        .map(|t| t.strip_suffix('*').unwrap_or(t))
        .unwrap_or(t)
}

/// Interpret one header card.
pub fn parse_card(card: &Card) -> Result<FitValue, ResultsError> {
    let raw = card.value.as_str();
    if !card.quoted {
        return Ok(FitValue {
            value: raw.trim().parse::<f64>().unwrap_or(f64::NAN),
            uncertainty: f64::NAN,
            flag: FitFlag::Unset,
        });
    }
    if let Some((value, uncertainty)) = raw.split_once("+/-") {
        if value.trim().starts_with('*') {
            return Ok(FitValue {
                value: number(raw, unstar(value))?,
                uncertainty: number(raw, unstar(uncertainty))?,
                flag: FitFlag::Problematic,
            });
        }
        return Ok(FitValue {
            value: number(raw, value)?,
            uncertainty: number(raw, uncertainty)?,
            flag: FitFlag::Free,
        });
    }
    if let Some(rest) = raw.trim().strip_prefix('[') {
        let inner = rest.split(']').next().unwrap_or(rest);
        return Ok(FitValue {
            value: number(raw, inner)?,
            uncertainty: f64::NAN,
            flag: FitFlag::Fixed,
        });
    }
    Err(ResultsError::Unrecognised(raw.to_string()))
}

/// Look up `key` and interpret it, degrading to [`FitValue::missing`] with a
/// warning when the value cannot be understood.
pub fn read_value(header: &Header, key: &str) -> FitValue {
    match header.card(key) {
        None => FitValue::missing(),
        Some(card) => parse_card(card).unwrap_or_else(|err| {
            warn!(key, %err, "unable to understand galfit result");
            FitValue::missing()
        }),
    }
}

/// Parameters reported for each component type.
pub fn component_parameters(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "sersic" => Some(&["XC", "YC", "MAG", "RE", "N", "AR", "PA"]),
        "devauc" | "expdisk" => Some(&["XC", "YC", "MAG", "RE", "AR", "PA"]),
        "sky" => Some(&["XC", "YC", "SKY", "DSDX", "DSDY"]),
        _ => None,
    }
}

/// Every parameter of one fit, with a column label per entry.
#[derive(Debug, Clone, Default)]
pub struct FitRecord {
    pub labels: Vec<String>,
    pub values: Vec<FitValue>,
}

impl FitRecord {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn push(&mut self, label: String, value: FitValue) {
        self.labels.push(label);
        self.values.push(value);
    }
}

/// Collect fit statistics and every component's parameters from a model HDU
/// header. Components are numbered from 1 and read until the first gap.
pub fn read_fit_record(header: &Header) -> FitRecord {
    let mut record = FitRecord::default();
    for key in STATISTICS {
        record.push(format!("GALFIT_{key}"), read_value(header, key));
    }
    for component in 1..=MAX_COMPONENTS {
        let Some(kind) = header.value(&format!("COMP_{component}")) else {
            break;
        };
        let Some(parameters) = component_parameters(kind) else {
            warn!(component, kind, "skipping component of unknown type");
            continue;
        };
        for param in parameters {
            record.push(
                format!("{}_{component}_{param}", kind.to_uppercase()),
                read_value(header, &format!("{component}_{param}")),
            );
        }
    }
    record
}
