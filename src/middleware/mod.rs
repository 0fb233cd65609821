pub mod admission;
pub mod timing;
