//! Input/output helpers.
//!
//! - workbook loading into owned sheets (`workbook`)
//! - per-cycle series export to CSV (`export`)
//! - fit JSON read/write (`fit_json`)

pub mod export;
pub mod fit_json;
pub mod workbook;

pub use export::*;
pub use fit_json::*;
pub use workbook::{Cell, Sheet, read_sheets};
