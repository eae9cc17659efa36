/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Channel symmetry statistics and mean-seeking compensation vectors.
//!
//! A compensation vector moves every channel onto the channel mean:
//! `delta[i] = mean − value[i]`. Its entries always sum to zero, so applying it
//! redistributes spread without shifting the overall level.

/// Mean and population standard deviation of a channel vector.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldSymmetry {
    /// Channel mean.
    pub mean: f64,
    /// Population standard deviation; `0` means perfectly symmetric.
    pub deviation: f64,
}

/// Symmetry of `values`. An empty vector is perfectly symmetric around zero.
pub fn symmetry(values: &[f64]) -> FieldSymmetry {
    if values.is_empty() {
        return FieldSymmetry {
            mean: 0.0,
            deviation: 0.0,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let deviation = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    FieldSymmetry { mean, deviation }
}

/// `mean − value` per channel.
pub fn compensation_vector(values: &[f64]) -> Vec<f64> {
    let FieldSymmetry { mean, .. } = symmetry(values);
    values.iter().map(|v| mean - v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetry_of_uniform_vector() {
        let s = symmetry(&[0.5; 9]);
        assert_eq!(s.mean, 0.5);
        assert_eq!(s.deviation, 0.0);
    }

    #[test]
    fn test_compensation_sums_to_zero() {
        let v = [1.1, 0.9, 1.3, 0.7, 1.0];
        let c = compensation_vector(&v);
        assert!(c.iter().sum::<f64>().abs() < 1e-12);
        let equalised: Vec<f64> = v.iter().zip(&c).map(|(a, b)| a + b).collect();
        assert!(symmetry(&equalised).deviation < 1e-12);
    }

    #[test]
    fn test_empty_vector() {
        assert!(compensation_vector(&[]).is_empty());
        assert_eq!(symmetry(&[]).mean, 0.0);
    }
}
