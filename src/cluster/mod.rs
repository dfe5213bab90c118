pub mod kmeans;
pub mod pca;
pub mod pipeline;
pub mod view;

pub use kmeans::{assign, inertia_sweep, KMeans, KMeansFit};
pub use pca::Pca;
pub use pipeline::{
    group_by_cluster, heuristic_cluster_count, run_clustering, write_assignments_csv, write_elbow_csv,
    ClusterGroups, ClusteringReport,
};
pub use view::{render_cluster_grid, select_cluster_samples, write_cluster_views, ClusterSample};
