pub mod diagnostics;
pub mod histogram1d;
pub mod histogram2d;
