use std::ops::BitAnd;

use regex::Regex;
use serde::{Deserialize, Serialize};

use polars::prelude::*;

use crate::cutter::region::Region;
use crate::error::CorrectionError;

/// One parsed `column op value` condition from a window expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCondition {
    pub column_name: String,
    pub operator: String,
    pub literal_value: f64,
}

/// A 1-D gate over frame columns, e.g. `"Tsum >= 100 & Tsum <= 200 & X1 != -1e6"`.
///
/// Conditions are joined with `&`; each is `column op value` with op one of
/// `>= <= != == > <` and value a float literal (`nan` and `inf` accepted).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowGate {
    pub name: String,
    pub expression: String,
}

impl WindowGate {
    pub fn new(name: &str, expression: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: expression.to_string(),
        }
    }

    pub fn parse_conditions(&self) -> Result<Vec<ParsedCondition>, CorrectionError> {
        if self.expression.trim().is_empty() {
            return Err(CorrectionError::Config(format!(
                "empty expression for gate '{}'",
                self.name
            )));
        }

        let condition_re = Regex::new(
            r"(?P<column>\w+)\s*(?P<op>>=|<=|!=|==|>|<)\s*(?P<value>-?\d+(?:\.\d+)?(?:e-?\d+)?|nan|inf)",
        )
        .map_err(|e| CorrectionError::Config(format!("condition pattern failed to compile: {e}")))?;

        let mut conditions = Vec::new();
        for expr in self.expression.split('&') {
            let expr = expr.trim();
            let Some(caps) = condition_re.captures(expr) else {
                return Err(CorrectionError::Config(format!(
                    "failed to parse condition '{expr}' in gate '{}'",
                    self.name
                )));
            };
            let literal_value: f64 = caps["value"].parse().map_err(|e| {
                CorrectionError::Config(format!(
                    "invalid numeric literal in gate '{}': {expr} ({e})",
                    self.name
                ))
            })?;
            conditions.push(ParsedCondition {
                column_name: caps["column"].to_string(),
                operator: caps["op"].to_string(),
                literal_value,
            });
        }
        Ok(conditions)
    }

    pub fn required_columns(&self) -> Vec<String> {
        self.parse_conditions()
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|cond| cond.column_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn mask(&self, df: &DataFrame) -> Result<BooleanChunked, CorrectionError> {
        let conditions = self.parse_conditions()?;
        let mut masks = Vec::new();
        for condition in &conditions {
            let column = df.column(&condition.column_name)?.f64()?;
            let mask = match condition.operator.as_str() {
                ">" => column.gt(condition.literal_value),
                "<" => column.lt(condition.literal_value),
                ">=" => column.gt_eq(condition.literal_value),
                "<=" => column.lt_eq(condition.literal_value),
                "==" => column.equal(condition.literal_value),
                "!=" => column.not_equal(condition.literal_value),
                op => {
                    return Err(CorrectionError::Config(format!(
                        "unknown operator '{op}' in gate '{}'",
                        self.name
                    )));
                }
            };
            masks.push(mask);
        }

        masks
            .into_iter()
            .reduce(|a, b| a.bitand(b))
            .ok_or_else(|| {
                CorrectionError::Config(format!("gate '{}' has no conditions", self.name))
            })
    }
}

/// A particle gate: window expression or 2-D polygon over its own columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Gate {
    Window(WindowGate),
    Shape(Region),
}

impl Gate {
    pub fn name(&self) -> &str {
        match self {
            Gate::Window(window) => &window.name,
            Gate::Shape(region) => &region.name,
        }
    }

    pub fn required_columns(&self) -> Vec<String> {
        match self {
            Gate::Window(window) => window.required_columns(),
            Gate::Shape(region) => vec![region.x_column.clone(), region.y_column.clone()],
        }
    }

    pub fn mask(&self, df: &DataFrame) -> Result<BooleanChunked, CorrectionError> {
        match self {
            Gate::Window(window) => window.mask(df),
            Gate::Shape(region) => Ok(region.mask(df)?),
        }
    }
}

/// Ordered gate set; an event passes when every member gate passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Gates {
    pub gates: Vec<Gate>,
}

impl Gates {
    pub fn new(gates: Vec<Gate>) -> Self {
        Self { gates }
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub fn required_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .gates
            .iter()
            .flat_map(|gate| gate.required_columns())
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Combined AND mask; with no gates every row passes.
    pub fn mask(&self, df: &DataFrame) -> Result<BooleanChunked, CorrectionError> {
        let masks: Vec<BooleanChunked> = self
            .gates
            .iter()
            .map(|gate| gate.mask(df))
            .collect::<Result<_, _>>()?;

        let combined = masks
            .into_iter()
            .reduce(|a, b| a.bitand(b))
            .unwrap_or_else(|| {
                BooleanChunked::from_slice("mask".into(), &vec![true; df.height()])
            });
        Ok(combined)
    }
}
