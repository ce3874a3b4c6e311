use fnv::FnvHashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub x: Value,
    pub y: Value,
}

#[derive(Debug, Clone)]
pub struct Bins {
    pub x: usize,
    pub x_width: f64,
    pub y: usize,
    pub y_width: f64,
    pub counts: FnvHashMap<(usize, usize), u64>,
    pub min_count: u64,
    pub max_count: u64,
}

#[derive(Debug, Clone)]
pub struct Histogram2D {
    pub name: String,
    pub bins: Bins,
    pub range: Range,
    pub overflow: u64,
    pub underflow: u64,
}

/// Flat form for JSON output. The sparse map keys are tuples, which JSON
/// maps cannot carry, so counts go out as sorted (x bin, y bin, count) rows.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Histogram2DExport {
    pub name: String,
    pub bins: (usize, usize),
    pub range: ((f64, f64), (f64, f64)),
    pub overflow: u64,
    pub underflow: u64,
    pub counts: Vec<(usize, usize, u64)>,
}

impl Histogram2D {
    // Create a new 2D Histogram with specified ranges and number of bins for each axis
    pub fn new(name: &str, bins: (usize, usize), range: ((f64, f64), (f64, f64))) -> Self {
        Self {
            name: name.to_owned(),
            bins: Bins {
                x: bins.0,
                x_width: (range.0.1 - range.0.0) / bins.0 as f64,
                y: bins.1,
                y_width: (range.1.1 - range.1.0) / bins.1 as f64,
                counts: FnvHashMap::default(),
                min_count: u64::MAX,
                max_count: u64::MIN,
            },
            range: Range {
                x: Value {
                    min: range.0.0,
                    max: range.0.1,
                },
                y: Value {
                    min: range.1.0,
                    max: range.1.1,
                },
            },
            overflow: 0,
            underflow: 0,
        }
    }

    pub fn reset(&mut self) {
        self.bins.counts.clear();
        self.bins.min_count = u64::MAX;
        self.bins.max_count = u64::MIN;
        self.overflow = 0;
        self.underflow = 0;
    }

    pub fn fill(&mut self, x_value: f64, y_value: f64) {
        if !x_value.is_finite() || !y_value.is_finite() {
            self.underflow += 1;
        } else if x_value < self.range.x.min {
            self.underflow += 1;
        } else if x_value >= self.range.x.max {
            self.overflow += 1;
        } else if y_value < self.range.y.min {
            self.underflow += 1;
        } else if y_value >= self.range.y.max {
            self.overflow += 1;
        } else {
            let x_index = ((x_value - self.range.x.min) / self.bins.x_width) as usize;
            let y_index = ((y_value - self.range.y.min) / self.bins.y_width) as usize;

            let count = self.bins.counts.entry((x_index, y_index)).or_insert(0);
            *count += 1;

            self.bins.min_count = self.bins.min_count.min(*count);
            self.bins.max_count = self.bins.max_count.max(*count);
        }
    }

    pub fn total(&self) -> u64 {
        self.bins.counts.values().sum()
    }

    pub fn count_at(&self, x_index: usize, y_index: usize) -> u64 {
        self.bins
            .counts
            .get(&(x_index, y_index))
            .copied()
            .unwrap_or(0)
    }

    pub fn export(&self) -> Histogram2DExport {
        let mut counts: Vec<(usize, usize, u64)> = self
            .bins
            .counts
            .iter()
            .map(|(&(x, y), &count)| (x, y, count))
            .collect();
        counts.sort_unstable();
        Histogram2DExport {
            name: self.name.clone(),
            bins: (self.bins.x, self.bins.y),
            range: (
                (self.range.x.min, self.range.x.max),
                (self.range.y.min, self.range.y.max),
            ),
            overflow: self.overflow,
            underflow: self.underflow,
            counts,
        }
    }
}
