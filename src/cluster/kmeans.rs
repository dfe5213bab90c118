//! k-means クラスタリング（k-means++ 初期化 + Lloyd 反復）

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct KMeans {
    pub n_clusters: usize,
    pub max_iter: usize,
    /// 重心移動量の収束閾値（特徴量分散の平均に対する相対値）
    pub tol: f64,
    pub seed: u64,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// [k, n_features]
    pub centroids: Array2<f64>,
    /// 各サンプルのクラスタID（0..k）
    pub labels: Vec<usize>,
    /// 各点から所属重心への二乗距離の総和
    pub inertia: f64,
    pub n_iter: usize,
}

impl KMeansFit {
    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            max_iter: 300,
            tol: 1e-4,
            seed: 0,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn check_cluster_count(&self, x: &Array2<f64>) -> Result<()> {
        if self.n_clusters == 0 || self.n_clusters > x.nrows() {
            return Err(PipelineError::InvalidClusterCount {
                k: self.n_clusters,
                samples: x.nrows(),
            });
        }
        Ok(())
    }

    pub fn fit(&self, x: &Array2<f64>) -> Result<KMeansFit> {
        self.check_cluster_count(x)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let centroids = plus_plus_init(x, self.n_clusters, &mut rng);
        Ok(self.lloyd(x, centroids))
    }

    /// 既存の解に k-means++ で重心を1つ追加して再学習する
    pub fn fit_from(&self, x: &Array2<f64>, previous: &KMeansFit, rng: &mut StdRng) -> Result<KMeansFit> {
        self.check_cluster_count(x)?;
        if previous.n_clusters() + 1 != self.n_clusters {
            return Err(PipelineError::InvalidClusterCount {
                k: self.n_clusters,
                samples: x.nrows(),
            });
        }
        let mut centroids = Array2::zeros((self.n_clusters, x.ncols()));
        centroids
            .slice_mut(ndarray::s![..previous.n_clusters(), ..])
            .assign(&previous.centroids);
        let next = sample_next_centroid(x, &previous.centroids, rng);
        centroids.row_mut(self.n_clusters - 1).assign(&x.row(next));
        Ok(self.lloyd(x, centroids))
    }

    /// Lloyd 反復。途中で最も慣性の小さかった状態を返す。
    ///
    /// 返す状態では全てのクラスタIDに1点以上が所属する。
    fn lloyd(&self, x: &Array2<f64>, mut centroids: Array2<f64>) -> KMeansFit {
        let k = centroids.nrows();
        let tol = self.tol * mean_feature_variance(x);

        let (mut labels, mut distances) = assign(x, &centroids);
        let mut best = KMeansFit {
            centroids: centroids.clone(),
            labels: labels.clone(),
            inertia: distances.sum(),
            n_iter: 0,
        };

        for iter in 1..=self.max_iter {
            let mut sums = Array2::<f64>::zeros(centroids.dim());
            let mut counts = vec![0usize; k];
            for (i, &label) in labels.iter().enumerate() {
                sums.row_mut(label).scaled_add(1.0, &x.row(i));
                counts[label] += 1;
            }

            let mut updated = centroids.clone();
            for c in 0..k {
                if counts[c] > 0 {
                    updated.row_mut(c).assign(&(&sums.row(c) / counts[c] as f64));
                }
            }
            relocate_empty(x, &mut updated, &counts, &mut distances);

            let shift: f64 = (&updated - &centroids).iter().map(|d| d * d).sum();
            centroids = updated;
            let (new_labels, new_distances) = assign(x, &centroids);
            labels = new_labels;
            distances = new_distances;

            let inertia = distances.sum();
            if inertia < best.inertia {
                best = KMeansFit {
                    centroids: centroids.clone(),
                    labels: labels.clone(),
                    inertia,
                    n_iter: iter,
                };
            }
            if shift <= tol {
                debug!("k-means (k={}) は {} 回で収束しました", k, iter);
                break;
            }
        }

        fill_empty_clusters(x, &mut best);
        best
    }
}

/// 各点を最近傍の重心に割り当て、ラベルと二乗距離を返す
pub fn assign(x: &Array2<f64>, centroids: &Array2<f64>) -> (Vec<usize>, Array1<f64>) {
    let x_norms = x.map_axis(Axis(1), |row| row.dot(&row));
    let c_norms = centroids.map_axis(Axis(1), |row| row.dot(&row));
    let cross = x.dot(&centroids.t());

    let mut labels = Vec::with_capacity(x.nrows());
    let mut distances = Array1::zeros(x.nrows());
    for (i, row) in cross.outer_iter().enumerate() {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (c, &dot) in row.iter().enumerate() {
            let dist = x_norms[i] - 2.0 * dot + c_norms[c];
            if dist < best_dist {
                best_dist = dist;
                best = c;
            }
        }
        labels.push(best);
        distances[i] = squared_distance(x.row(i), centroids.row(best));
    }
    (labels, distances)
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn mean_feature_variance(x: &Array2<f64>) -> f64 {
    if x.nrows() == 0 {
        return 0.0;
    }
    x.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}

/// 空になったクラスタの重心を、現在の所属重心から最も遠い点へ移す
fn relocate_empty(x: &Array2<f64>, centroids: &mut Array2<f64>, counts: &[usize], distances: &mut Array1<f64>) {
    for (c, &count) in counts.iter().enumerate() {
        if count > 0 {
            continue;
        }
        let far = distances
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        if let Some(far) = far {
            centroids.row_mut(c).assign(&x.row(far));
            distances[far] = 0.0;
        }
    }
}

/// 空のクラスタに、2点以上のクラスタから最も遠い点を1つずつ移す
///
/// 移した点は新しい重心そのものになるので慣性は増えない。
fn fill_empty_clusters(x: &Array2<f64>, fit: &mut KMeansFit) {
    let mut counts = vec![0usize; fit.n_clusters()];
    for &label in &fit.labels {
        counts[label] += 1;
    }
    if counts.iter().all(|&c| c > 0) {
        return;
    }

    let mut distances: Vec<f64> = fit
        .labels
        .iter()
        .enumerate()
        .map(|(i, &label)| squared_distance(x.row(i), fit.centroids.row(label)))
        .collect();

    for c in 0..counts.len() {
        if counts[c] > 0 {
            continue;
        }
        let donor = (0..fit.labels.len())
            .filter(|&i| counts[fit.labels[i]] > 1)
            .max_by(|&a, &b| distances[a].total_cmp(&distances[b]));
        let Some(i) = donor else {
            break;
        };
        debug!("空のクラスタ {} に点 {} を移します", c, i);
        counts[fit.labels[i]] -= 1;
        counts[c] = 1;
        fit.labels[i] = c;
        fit.centroids.row_mut(c).assign(&x.row(i));
        distances[i] = 0.0;
    }

    fit.inertia = distances.iter().sum();
}

/// 重みに比例する確率でインデックスを1つ選ぶ（重みが全て0なら一様）
fn sample_by_weight(weights: &Array1<f64>, rng: &mut StdRng) -> usize {
    let total = weights.sum();
    if total <= 0.0 {
        return rng.gen_range(0..weights.len());
    }
    let mut target = rng.gen_range(0.0..total);
    for (i, &w) in weights.iter().enumerate() {
        if target < w {
            return i;
        }
        target -= w;
    }
    weights.len() - 1
}

/// 既存の重心からの二乗距離に比例する確率で次の重心を選ぶ
fn sample_next_centroid(x: &Array2<f64>, centroids: &Array2<f64>, rng: &mut StdRng) -> usize {
    let (_, distances) = assign(x, centroids);
    sample_by_weight(&distances, rng)
}

/// k-means++ 初期化
fn plus_plus_init(x: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let first = rng.gen_range(0..x.nrows());
    let mut chosen = vec![first];
    let mut closest = x.map_axis(Axis(1), |row| squared_distance(row, x.row(first)));

    while chosen.len() < k {
        let next = sample_by_weight(&closest, rng);
        chosen.push(next);
        for (i, d) in closest.iter_mut().enumerate() {
            *d = d.min(squared_distance(x.row(i), x.row(next)));
        }
    }
    x.select(Axis(0), &chosen)
}

/// クラスタ数を変えながら慣性を記録する（エルボー曲線用）
///
/// k+1 の学習は k の解に重心を1つ足した状態から始めるため、慣性は単調非増加になる。
pub fn inertia_sweep(x: &Array2<f64>, ks: Range<usize>, base: &KMeans) -> Result<Vec<(usize, f64)>> {
    let mut curve = Vec::with_capacity(ks.len());
    let mut rng = StdRng::seed_from_u64(base.seed);
    let mut previous: Option<KMeansFit> = None;

    for k in ks {
        let model = KMeans { n_clusters: k, ..base.clone() };
        let fit = match &previous {
            Some(prev) if prev.n_clusters() + 1 == k => model.fit_from(x, prev, &mut rng)?,
            _ => model.fit(x)?,
        };
        info!("k = {:>3}: inertia = {:.4}", k, fit.inertia);
        curve.push((k, fit.inertia));
        previous = Some(fit);
    }

    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 3つのはっきり分かれた塊
    fn blobs() -> Array2<f64> {
        let centers = [[0.0, 0.0], [10.0, 10.0], [-10.0, 10.0]];
        Array2::from_shape_fn((30, 2), |(i, j)| {
            let offset = ((i * 7 + j * 3) % 5) as f64 * 0.1 - 0.2;
            centers[i % 3][j] + offset
        })
    }

    #[test]
    fn test_recovers_separated_blobs() {
        let x = blobs();
        let fit = KMeans::new(3).with_seed(22).fit(&x).unwrap();
        assert_eq!(fit.labels.len(), 30);
        for i in 0..30 {
            for j in 0..30 {
                assert_eq!(fit.labels[i] == fit.labels[j], i % 3 == j % 3);
            }
        }
        assert!(fit.inertia < 5.0);
    }

    #[test]
    fn test_labels_are_dense() {
        let x = blobs();
        let fit = KMeans::new(4).with_seed(1).fit(&x).unwrap();
        assert!(fit.labels.iter().all(|&l| l < 4));
        assert_eq!(fit.n_clusters(), 4);
    }

    #[test]
    fn test_every_cluster_has_a_member() {
        // 異なる点は3種類だけ。重複点に重心が重なると空クラスタができやすい
        let points = [[0.0, 0.0], [5.0, 5.0], [9.0, 0.0]];
        let x = Array2::from_shape_fn((12, 2), |(i, j)| points[if i < 8 { 0 } else { i % 3 }][j]);

        for seed in 0..10 {
            for k in [4, 6, 12] {
                let fit = KMeans::new(k).with_seed(seed).fit(&x).unwrap();
                let mut counts = vec![0; k];
                for &label in &fit.labels {
                    counts[label] += 1;
                }
                assert!(counts.iter().all(|&c| c > 0), "seed {} k {}: {:?}", seed, k, counts);

                let manual: f64 = (0..x.nrows())
                    .map(|i| squared_distance(x.row(i), fit.centroids.row(fit.labels[i])))
                    .sum();
                assert!((manual - fit.inertia).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_inertia_matches_assignment() {
        let x = blobs();
        let fit = KMeans::new(2).with_seed(5).fit(&x).unwrap();
        let manual: f64 = (0..x.nrows())
            .map(|i| squared_distance(x.row(i), fit.centroids.row(fit.labels[i])))
            .sum();
        assert!((manual - fit.inertia).abs() < 1e-9);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let x = blobs();
        let a = KMeans::new(3).with_seed(22).fit(&x).unwrap();
        let b = KMeans::new(3).with_seed(22).fit(&x).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn test_sweep_inertia_is_non_increasing() {
        let x = Array2::from_shape_fn((60, 4), |(i, j)| ((i * 13 + j * 29) % 17) as f64 + (i % 5) as f64);
        let curve = inertia_sweep(&x, 2..12, &KMeans::new(2).with_seed(3)).unwrap();
        assert_eq!(curve.len(), 10);
        assert_eq!(curve.first().map(|c| c.0), Some(2));
        for pair in curve.windows(2) {
            assert!(pair[1].1 <= pair[0].1 * (1.0 + 1e-9), "{:?}", curve);
        }
    }

    #[test]
    fn test_empty_sweep() {
        let x = blobs();
        let curve = inertia_sweep(&x, 2..2, &KMeans::new(2)).unwrap();
        assert!(curve.is_empty());
    }

    #[test]
    fn test_invalid_cluster_counts() {
        let x = blobs();
        assert!(matches!(
            KMeans::new(0).fit(&x),
            Err(PipelineError::InvalidClusterCount { k: 0, .. })
        ));
        assert!(matches!(
            KMeans::new(31).fit(&x),
            Err(PipelineError::InvalidClusterCount { k: 31, samples: 30 })
        ));
    }
}
