use std::fs::File;
use std::io::{BufReader, Write};

use geo::Intersects;
use serde::{Deserialize, Serialize};

use polars::prelude::*;

use crate::error::CorrectionError;

/// A named closed polygon in a 2-D spectrum plane.
///
/// Regions are drawn by an operator (or generated upstream) and loaded from
/// JSON. Membership is edge-inclusive: a point exactly on an edge or vertex
/// counts as inside. Self-intersecting polygons are accepted as drawn and
/// evaluated deterministically, without any preprocessing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub name: String,
    pub vertices: Vec<[f64; 2]>,
    #[serde(default)]
    pub x_column: String,
    #[serde(default)]
    pub y_column: String,
}

impl Region {
    pub fn new(
        name: &str,
        vertices: Vec<[f64; 2]>,
        x_column: &str,
        y_column: &str,
    ) -> Result<Self, CorrectionError> {
        let region = Self {
            name: name.to_string(),
            vertices,
            x_column: x_column.to_string(),
            y_column: y_column.to_string(),
        };
        region.validate()?;
        Ok(region)
    }

    /// A polygon needs at least 3 finite vertices to bound any area.
    pub fn validate(&self) -> Result<(), CorrectionError> {
        if self.vertices.len() < 3 {
            return Err(CorrectionError::InvalidRegion {
                name: self.name.clone(),
                reason: format!("needs at least 3 vertices, has {}", self.vertices.len()),
            });
        }
        if let Some(bad) = self
            .vertices
            .iter()
            .find(|v| !v[0].is_finite() || !v[1].is_finite())
        {
            return Err(CorrectionError::InvalidRegion {
                name: self.name.clone(),
                reason: format!("vertex ({}, {}) is not finite", bad[0], bad[1]),
            });
        }
        Ok(())
    }

    fn to_geo_polygon(&self) -> geo::Polygon<f64> {
        let exterior_coords: Vec<_> = self.vertices.iter().map(|&[x, y]| (x, y)).collect();
        let exterior_line_string = geo::LineString::from(exterior_coords);
        geo::Polygon::new(exterior_line_string, vec![])
    }

    /// Edge-inclusive membership test. NaN coordinates are never inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        let point = geo::Point::new(x, y);
        let polygon = self.to_geo_polygon();
        polygon.intersects(&point)
    }

    /// Membership flags for a whole point set, building the polygon once.
    pub fn contains_slice(&self, xs: &[f64], ys: &[f64]) -> Vec<bool> {
        let polygon = self.to_geo_polygon();
        xs.iter()
            .zip(ys.iter())
            .map(|(&x, &y)| {
                x.is_finite() && y.is_finite() && polygon.intersects(&geo::Point::new(x, y))
            })
            .collect()
    }

    fn bounding_box(&self) -> (f64, f64, f64, f64) {
        let x_min = self
            .vertices
            .iter()
            .map(|&[x, _]| x)
            .fold(f64::INFINITY, f64::min);
        let x_max = self
            .vertices
            .iter()
            .map(|&[x, _]| x)
            .fold(f64::NEG_INFINITY, f64::max);
        let y_min = self
            .vertices
            .iter()
            .map(|&[_, y]| y)
            .fold(f64::INFINITY, f64::min);
        let y_max = self
            .vertices
            .iter()
            .map(|&[_, y]| y)
            .fold(f64::NEG_INFINITY, f64::max);
        (x_min, x_max, y_min, y_max)
    }

    /// Row mask over the region's own columns. The bounding box screens out
    /// the bulk of the frame before the exact polygon test; null entries are
    /// never inside.
    pub fn mask(&self, df: &DataFrame) -> Result<BooleanChunked, PolarsError> {
        let polygon = self.to_geo_polygon();
        let (x_min, x_max, y_min, y_max) = self.bounding_box();
        let x_col = df.column(&self.x_column)?.f64()?;
        let y_col = df.column(&self.y_column)?.f64()?;

        let mask = x_col
            .into_iter()
            .zip(y_col.into_iter())
            .map(|(x, y)| match (x, y) {
                (Some(x), Some(y)) => {
                    x >= x_min
                        && x <= x_max
                        && y >= y_min
                        && y <= y_max
                        && polygon.intersects(&geo::Point::new(x, y))
                }
                _ => false,
            })
            .collect::<BooleanChunked>();

        Ok(mask)
    }

    pub fn save_to_json(&self, path: &str) -> Result<(), CorrectionError> {
        let serialized = serde_json::to_string(self)?;
        let mut file = File::create(path)?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }

    pub fn load_from_json(path: &str) -> Result<Self, CorrectionError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let region: Self = serde_json::from_reader(reader)?;
        region.validate()?;
        Ok(region)
    }
}
