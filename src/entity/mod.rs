pub mod measurements;
pub mod sensors;
pub mod stations;
