//! Database operations for the prediction engine

pub mod admissions;
pub mod ocr;
pub mod prediction_results;
pub mod students;
