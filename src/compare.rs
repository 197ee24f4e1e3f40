use serde::Serialize;

/// Outcome of an element-wise tolerance comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub passed: bool,
    /// Largest `|actual - expected|`, NaN when either side has a NaN
    pub max_abs_diff: f32,
    /// Elements outside the tolerance
    pub mismatches: usize,
}

/// `|x - y| <= atol + rtol * |y|` for every pair
///
/// NaN is never close to anything, and slices of different length never match.
pub fn allclose(actual: &[f32], expected: &[f32], atol: f32, rtol: f32) -> Comparison {
    if actual.len() != expected.len() {
        return Comparison {
            passed: false,
            max_abs_diff: ::std::f32::INFINITY,
            mismatches: actual.len().max(expected.len()),
        };
    }
    let mut max_abs_diff = 0.0f32;
    let mut mismatches = 0;
    for (&x, &y) in actual.iter().zip(expected) {
        let diff = (x - y).abs();
        if diff.is_nan() || max_abs_diff.is_nan() {
            max_abs_diff = ::std::f32::NAN;
        } else if diff > max_abs_diff {
            max_abs_diff = diff;
        }
        if !(diff <= atol + rtol * y.abs()) {
            mismatches += 1;
        }
    }
    Comparison {
        passed: mismatches == 0,
        max_abs_diff,
        mismatches,
    }
}
