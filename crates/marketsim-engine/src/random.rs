//! 난수 유틸리티.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Box-Muller 변환으로 표준 정규 분포 값을 뽑습니다.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // (0, 1] 범위로 옮겨 ln(0)을 피함
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// 시드가 있으면 재현 가능한, 없으면 엔트로피 기반 생성기를 만듭니다.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

        assert!(mean.abs() < 0.05, "mean = {mean}");
        assert!((var - 1.0).abs() < 0.05, "var = {var}");
        assert!(samples.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let mut a = make_rng(Some(1));
        let mut b = make_rng(Some(1));
        assert_eq!(a.gen::<u64>(), b.gen::<u64>());
    }
}
