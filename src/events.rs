use polars::prelude::*;

use crate::error::CorrectionError;

/// Columnar event collection for one correction run.
///
/// Each index is one focal-plane event: the weighted wire position (mm), the
/// ray-angle proxy, and whether the event passed the particle gates. The
/// store is never mutated after construction; de-tilting produces a fresh
/// store via [`EventStore::with_angles`] and the correction pass returns its
/// results in a parallel vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStore {
    position: Vec<f64>,
    angle: Vec<f64>,
    gate: Vec<bool>,
}

impl EventStore {
    pub fn new(
        position: Vec<f64>,
        angle: Vec<f64>,
        gate: Vec<bool>,
    ) -> Result<Self, CorrectionError> {
        if position.len() != angle.len() || position.len() != gate.len() {
            return Err(CorrectionError::DegenerateInput(format!(
                "event columns have mismatched lengths: {} positions, {} angles, {} gate flags",
                position.len(),
                angle.len(),
                gate.len()
            )));
        }
        Ok(Self {
            position,
            angle,
            gate,
        })
    }

    /// Pulls the position and angle columns out of a polars frame. Null
    /// entries become NaN so the corrector can skip them event by event.
    pub fn from_dataframe(
        df: &DataFrame,
        position_column: &str,
        angle_column: &str,
        gate: Option<&BooleanChunked>,
    ) -> Result<Self, CorrectionError> {
        let position: Vec<f64> = df
            .column(position_column)?
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        let angle: Vec<f64> = df
            .column(angle_column)?
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        let gate = match gate {
            Some(mask) => mask.into_iter().map(|v| v.unwrap_or(false)).collect(),
            None => vec![true; position.len()],
        };
        Self::new(position, angle, gate)
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    pub fn positions(&self) -> &[f64] {
        &self.position
    }

    pub fn angles(&self) -> &[f64] {
        &self.angle
    }

    pub fn gates(&self) -> &[bool] {
        &self.gate
    }

    pub fn gated_count(&self) -> usize {
        self.gate.iter().filter(|&&g| g).count()
    }

    /// Working copy with replaced angles, used after de-tilting. Positions
    /// and gate flags are shared unchanged.
    pub fn with_angles(&self, angle: Vec<f64>) -> Result<Self, CorrectionError> {
        if angle.len() != self.position.len() {
            return Err(CorrectionError::DegenerateInput(format!(
                "replacement angle column has {} entries, store has {}",
                angle.len(),
                self.position.len()
            )));
        }
        Ok(Self {
            position: self.position.clone(),
            angle,
            gate: self.gate.clone(),
        })
    }
}
