//! Memory normalizer: narrows wide numeric columns.

use crate::frame::{Column, FeatureFrame};

/// Downcast every `F64` column to `F32` and every `I64` column whose
/// values all fit in `i32` to `I32`. Other columns pass through.
pub fn normalize(mut frame: FeatureFrame) -> FeatureFrame {
    for column in frame.columns_mut() {
        if let Some(narrow) = narrow(column) {
            *column = narrow;
        }
    }
    frame
}

fn narrow(column: &Column) -> Option<Column> {
    match column {
        Column::F64(values) => Some(Column::F32(values.iter().map(|&v| v as f32).collect())),
        Column::I64(values) => {
            let fits = values
                .iter()
                .all(|&v| v >= i32::MIN as i64 && v <= i32::MAX as i64);
            fits.then(|| Column::I32(values.iter().map(|&v| v as i32).collect()))
        }
        _ => None,
    }
}
