pub mod geodesy;

pub use geodesy::Geodesy;
