pub mod gaussian;
pub mod linear;
pub mod polynomial;
pub mod regional;
