use serde::{Deserialize, Serialize};

/// Fitted standardization: `(x - mean) / scale` per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Columns in fit order.
    pub feature_names: Vec<String>,
    /// Column means.
    pub mean: Vec<f64>,
    /// Column standard deviations. Zero is read as one.
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Checks that every vector has one entry per feature.
    pub fn validate(&self) -> Result<(), String> {
        let width = self.feature_names.len();
        if self.mean.len() != width || self.scale.len() != width {
            return Err(format!(
                "{width} features but {} means and {} scales",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if self
            .mean
            .iter()
            .chain(self.scale.iter())
            .any(|value| !value.is_finite())
        {
            return Err("means and scales must be finite".into());
        }
        Ok(())
    }

    /// Number of columns the scaler was fitted on.
    #[must_use]
    pub fn width(&self) -> usize {
        self.feature_names.len()
    }

    /// Standardizes a row in place. Missing values stay missing.
    pub fn transform(&self, row: &mut [Option<f64>]) {
        for ((value, mean), scale) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
            if let Some(value) = value.as_mut() {
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                *value = (*value - mean) / scale;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms_and_preserves_missing() {
        let scaler = StandardScaler {
            feature_names: vec!["a".into(), "b".into(), "c".into()],
            mean: vec![1.0, 0.0, 5.0],
            scale: vec![2.0, 0.0, 1.0],
        };
        scaler.validate().unwrap();
        let mut row = [Some(5.0), Some(3.0), None];
        scaler.transform(&mut row);
        assert_eq!(row, [Some(2.0), Some(3.0), None]);
    }

    #[test]
    fn rejects_width_mismatch() {
        let scaler = StandardScaler {
            feature_names: vec!["a".into()],
            mean: vec![0.0, 1.0],
            scale: vec![1.0],
        };
        assert!(scaler.validate().is_err());
    }
}
