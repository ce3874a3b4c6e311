pub mod gates;
pub mod region;
