//! 主成分分析（乱択SVD）
//!
//! 中心化したデータに対して Halko らの乱択レンジファインダーで部分空間を求め、
//! 小さな対称行列の固有値分解（Jacobi 法）から主成分を得ます。

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// レンジファインダーの過剰サンプリング数
const OVERSAMPLES: usize = 10;
/// べき乗反復の回数
const POWER_ITERATIONS: usize = 4;
const JACOBI_MAX_SWEEPS: usize = 60;

#[derive(Debug, Clone)]
pub struct Pca {
    mean: Array1<f64>,
    /// [n_components, n_features]、行が主成分
    components: Array2<f64>,
    explained_variance: Array1<f64>,
}

impl Pca {
    /// `x` (行 = サンプル) に主成分 `n_components` 個を当てはめる
    pub fn fit(x: &Array2<f64>, n_components: usize, seed: u64) -> Result<Self> {
        let (n_samples, n_features) = x.dim();
        if n_components == 0 || n_components > n_samples.min(n_features) {
            return Err(PipelineError::InsufficientSamples {
                samples: n_samples,
                features: n_features,
                components: n_components,
            });
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::Model("空の行列です".into()))?;
        let centered = x - &mean;

        let rank = (n_components + OVERSAMPLES).min(n_samples.min(n_features));
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let omega = Array2::from_shape_fn((n_features, rank), |_| rng.gen_range(-1.0..1.0));

        let mut q = orthonormalize(centered.dot(&omega));
        for _ in 0..POWER_ITERATIONS {
            let z = orthonormalize(centered.t().dot(&q));
            q = orthonormalize(centered.dot(&z));
        }

        // B = Q^T X (rank x n_features)、B B^T の固有分解から右特異ベクトルを得る
        let b = q.t().dot(&centered);
        let gram = b.dot(&b.t());
        let (eigenvalues, eigenvectors) = symmetric_eigen(gram);

        let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
        order.sort_by(|&i, &j| eigenvalues[j].total_cmp(&eigenvalues[i]));

        let denom = (n_samples.max(2) - 1) as f64;
        let mut components = Array2::zeros((n_components, n_features));
        let mut explained_variance = Array1::zeros(n_components);
        for (row, &idx) in order.iter().take(n_components).enumerate() {
            let lambda = eigenvalues[idx].max(0.0);
            let sigma = lambda.sqrt();
            explained_variance[row] = lambda / denom;
            if sigma <= f64::EPSILON {
                continue;
            }
            let u = eigenvectors.column(idx);
            let mut v = b.t().dot(&u) / sigma;

            // 絶対値最大の成分を正にそろえて符号を決定的にする
            let pivot = v
                .iter()
                .copied()
                .fold(0.0f64, |acc, value| if value.abs() > acc.abs() { value } else { acc });
            if pivot < 0.0 {
                v.mapv_inplace(|value| -value);
            }
            components.row_mut(row).assign(&v);
        }

        debug!(
            "PCA: {} x {} -> {} 成分 (上位分散 {:.4})",
            n_samples,
            n_features,
            n_components,
            explained_variance.first().copied().unwrap_or(0.0)
        );

        Ok(Self {
            mean,
            components,
            explained_variance,
        })
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean).dot(&self.components.t())
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }
}

/// 列ベクトルの修正グラム・シュミット直交化
///
/// 線形従属な列はゼロ列になる。
fn orthonormalize(m: Array2<f64>) -> Array2<f64> {
    // 列を連続した行として扱う
    let mut t = m.t().as_standard_layout().into_owned();
    for j in 0..t.nrows() {
        let (done, mut rest) = t.view_mut().split_at(Axis(0), j);
        let mut v = rest.row_mut(0);
        for q in done.outer_iter() {
            let proj = q.dot(&v);
            v.scaled_add(-proj, &q);
        }
        let norm = v.dot(&v).sqrt();
        if norm > 1e-10 {
            v.mapv_inplace(|x| x / norm);
        } else {
            v.fill(0.0);
        }
    }
    t.reversed_axes()
}

/// 対称行列の固有値分解（巡回 Jacobi 法）
///
/// 戻り値は (固有値, 固有ベクトルを列に持つ行列)。順序は未整列。
fn symmetric_eigen(mut a: Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    let total: f64 = a.iter().map(|x| x * x).sum();

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off <= 1e-26 * total.max(f64::MIN_POSITIVE) {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    (a.diag().to_owned(), v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn noisy_line(n: usize) -> Array2<f64> {
        // 方向 (1, 2, 2)/3 に沿った点 + 小さな直交ノイズ
        Array2::from_shape_fn((n, 3), |(i, j)| {
            let t = i as f64 - n as f64 / 2.0;
            let dir = [1.0, 2.0, 2.0][j] / 3.0;
            let noise = if (i + j) % 2 == 0 { 0.01 } else { -0.01 };
            5.0 + t * dir + noise
        })
    }

    #[test]
    fn test_symmetric_eigen_diagonalizes() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 1.0]];
        let (values, vectors) = symmetric_eigen(a.clone());
        for i in 0..3 {
            let av = a.dot(&vectors.column(i));
            let lv = &vectors.column(i) * values[i];
            for k in 0..3 {
                assert!((av[k] - lv[k]).abs() < 1e-9);
            }
        }
        let trace: f64 = values.sum();
        assert!((trace - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_orthonormalize_columns() {
        let m = Array2::from_shape_fn((20, 5), |(i, j)| ((i * 13 + j * 7) % 17) as f64 - 8.0 + (i * j) as f64 * 0.05);
        let q = orthonormalize(m);
        assert_eq!(q.dim(), (20, 5));
        let gram = q.t().dot(&q);
        for i in 0..5 {
            for j in 0..5 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-9, "{:?}", gram);
            }
        }

        // 従属な列はゼロになる
        let dependent = array![[1.0, 2.0, 0.0], [2.0, 4.0, 1.0], [0.0, 0.0, 3.0]];
        let q = orthonormalize(dependent);
        assert!(q.column(1).iter().all(|v| v.abs() < 1e-12));
        assert!((q.column(0).dot(&q.column(0)) - 1.0).abs() < 1e-12);
        assert!(q.column(0).dot(&q.column(2)).abs() < 1e-12);
    }

    #[test]
    fn test_first_component_follows_dominant_direction() {
        let x = noisy_line(40);
        let pca = Pca::fit(&x, 2, 22).unwrap();
        let first = pca.components().row(0);
        let expected = [1.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0];
        for k in 0..3 {
            assert!((first[k] - expected[k]).abs() < 1e-3, "{:?}", first);
        }
        let variance = pca.explained_variance();
        assert!(variance[0] > variance[1]);
    }

    #[test]
    fn test_components_are_orthonormal() {
        let x = Array2::from_shape_fn((30, 6), |(i, j)| ((i * 7 + j * 13) % 11) as f64 + (i * j) as f64 * 0.1);
        let pca = Pca::fit(&x, 4, 1).unwrap();
        let c = pca.components();
        let gram = c.dot(&c.t());
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_transform_shape_and_centering() {
        let x = noisy_line(20);
        let pca = Pca::fit(&x, 2, 7).unwrap();
        let reduced = pca.transform(&x);
        assert_eq!(reduced.dim(), (20, 2));
        let column_means = reduced.mean_axis(Axis(0)).unwrap();
        assert!(column_means.iter().all(|m| m.abs() < 1e-9));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let x = Array2::from_shape_fn((25, 8), |(i, j)| ((i * 31 + j * 17) % 13) as f64);
        let a = Pca::fit(&x, 3, 22).unwrap();
        let b = Pca::fit(&x, 3, 22).unwrap();
        assert_eq!(a.components(), b.components());
    }

    #[test]
    fn test_too_few_samples_fails() {
        let x = Array2::<f64>::zeros((5, 10));
        let err = Pca::fit(&x, 6, 0).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientSamples { samples: 5, components: 6, .. }
        ));
    }
}
