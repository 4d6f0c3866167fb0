//! Small shared vector kernels used by the context, encoder and training
//! drivers. Grounded on `original_source/lib/crf/src/vecmath.h`; expressed
//! here as plain slice functions instead of macros.

/// Dot product of two equal-length slices.
pub fn vecdot(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// In-place `x *= a`.
pub fn vecscale(x: &mut [f64], a: f64) {
    for v in x.iter_mut() {
        *v *= a;
    }
}

/// In-place `y += a * x`.
pub fn vecadd_scaled(y: &mut [f64], x: &[f64], a: f64) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

/// In-place `y -= x`.
pub fn vecsub(y: &mut [f64], x: &[f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi -= xi;
    }
}

/// Squared L2 norm.
pub fn vecnorm2(x: &[f64]) -> f64 {
    vecdot(x, x)
}

/// `log(sum(exp(xs)))`, computed by subtracting the max for stability.
/// Returns `f64::NEG_INFINITY` for an empty slice.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let Some(&max) = xs.iter().cloned().reduce(f64::max) else {
        return f64::NEG_INFINITY;
    };
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Zero-preserving exponential: `x == 0.0 ? 1.0 : exp(x)`. Arithmetically
/// the same as a plain `exp` (since `exp(0.0) == 1.0`), but the code path
/// matters: a state/transition entry still at its reset value of `0.0`
/// means "no feature touched this", and the source treats that as an
/// explicit neutral element rather than letting it fall through `exp`.
/// Mirrors `crf1m_context.c`'s scaling convention (spec §9 Open Questions).
pub fn exp_zero_preserving(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        x.exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_and_scale() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert_eq!(vecdot(&a, &b), 32.0);

        let mut c = a;
        vecscale(&mut c, 2.0);
        assert_eq!(c, [2.0, 4.0, 6.0]);
    }

    #[test]
    fn logsumexp_matches_naive_for_small_inputs() {
        let xs = [0.1, 0.5, -0.3];
        let naive: f64 = xs.iter().map(|x| x.exp()).sum::<f64>().ln();
        assert!((logsumexp(&xs) - naive).abs() < 1e-12);
    }

    #[test]
    fn logsumexp_empty_is_neg_infinity() {
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn exp_zero_preserving_maps_neg_infinity_to_zero() {
        assert_eq!(exp_zero_preserving(f64::NEG_INFINITY), 0.0);
        assert_eq!(exp_zero_preserving(0.0), 1.0);
    }
}
