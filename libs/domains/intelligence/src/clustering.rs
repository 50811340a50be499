//! Clustering over item embeddings.
//!
//! Three algorithms: k-means (with farthest-point seeding), agglomerative
//! hierarchical (centroid linkage, merging while the closest pair stays
//! within `1 - threshold`), and DBSCAN (eps = `1 - threshold`, min_pts = 2).
//! Distances are cosine throughout.

use crate::similarity::cosine_similarity;
use domain_jobs::ClusteringAlgorithm;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One labeled cluster of item ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub label: String,
    pub item_ids: Vec<String>,
    pub centroid: Vec<f32>,
}

/// Outcome of one clustering run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringOutcome {
    pub algorithm: ClusteringAlgorithm,
    pub clusters: Vec<Cluster>,
    /// Items no cluster accepted (DBSCAN noise).
    pub unclustered: Vec<String>,
}

/// Cosine distance in [0, 2]; orthogonal vectors sit at 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// Cluster `(id, embedding)` pairs with the requested algorithm.
///
/// `threshold` is the similarity floor: merges and neighborhoods use the
/// distance ceiling `1 - threshold`. `num_clusters` only applies to k-means.
pub fn cluster(
    algorithm: ClusteringAlgorithm,
    points: &[(String, Vec<f32>)],
    threshold: f64,
    num_clusters: Option<usize>,
) -> ClusteringOutcome {
    if points.is_empty() {
        return ClusteringOutcome {
            algorithm,
            clusters: Vec::new(),
            unclustered: Vec::new(),
        };
    }

    match algorithm {
        ClusteringAlgorithm::Kmeans => kmeans(points, num_clusters),
        ClusteringAlgorithm::Hierarchical => hierarchical(points, threshold),
        ClusteringAlgorithm::Dbscan => dbscan(points, threshold),
    }
}

fn kmeans(points: &[(String, Vec<f32>)], num_clusters: Option<usize>) -> ClusteringOutcome {
    let n = points.len();
    let k = num_clusters
        .unwrap_or_else(|| ((n as f64 / 2.0).sqrt().ceil() as usize).max(1))
        .min(n);

    // Farthest-point seeding from a random start
    let mut rng = rand::rng();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..n)].1.clone());
    while centroids.len() < k {
        let farthest = points
            .iter()
            .max_by(|a, b| {
                let da = nearest_centroid_distance(&a.1, &centroids);
                let db = nearest_centroid_distance(&b.1, &centroids);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(_, embedding)| embedding.clone());
        match farthest {
            Some(embedding) => centroids.push(embedding),
            None => break,
        }
    }

    let mut assignments = vec![0usize; n];
    for _ in 0..20 {
        let mut changed = false;
        for (index, (_, embedding)) in points.iter().enumerate() {
            let best = (0..centroids.len())
                .min_by(|a, b| {
                    let da = cosine_distance(embedding, &centroids[*a]);
                    let db = cosine_distance(embedding, &centroids[*b]);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            if assignments[index] != best {
                assignments[index] = best;
                changed = true;
            }
        }

        for (cluster_index, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = points
                .iter()
                .enumerate()
                .filter(|(i, _)| assignments[*i] == cluster_index)
                .map(|(_, (_, e))| e)
                .collect();
            if !members.is_empty() {
                *centroid = mean_vector(&members);
            }
        }

        if !changed {
            break;
        }
    }

    let clusters = (0..centroids.len())
        .filter_map(|cluster_index| {
            let item_ids: Vec<String> = points
                .iter()
                .enumerate()
                .filter(|(i, _)| assignments[*i] == cluster_index)
                .map(|(_, (id, _))| id.clone())
                .collect();
            if item_ids.is_empty() {
                None
            } else {
                Some(Cluster {
                    label: format!("cluster-{cluster_index}"),
                    item_ids,
                    centroid: centroids[cluster_index].clone(),
                })
            }
        })
        .collect();

    ClusteringOutcome {
        algorithm: ClusteringAlgorithm::Kmeans,
        clusters,
        unclustered: Vec::new(),
    }
}

fn nearest_centroid_distance(embedding: &[f32], centroids: &[Vec<f32>]) -> f64 {
    centroids
        .iter()
        .map(|c| cosine_distance(embedding, c))
        .fold(f64::INFINITY, f64::min)
}

fn hierarchical(points: &[(String, Vec<f32>)], threshold: f64) -> ClusteringOutcome {
    let max_distance = 1.0 - threshold;

    // Every point starts as its own cluster
    let mut members: Vec<Vec<usize>> = (0..points.len()).map(|i| vec![i]).collect();
    let mut centroids: Vec<Vec<f32>> = points.iter().map(|(_, e)| e.clone()).collect();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..centroids.len() {
            for j in (i + 1)..centroids.len() {
                let distance = cosine_distance(&centroids[i], &centroids[j]);
                if best.map(|(_, _, d)| distance < d).unwrap_or(true) {
                    best = Some((i, j, distance));
                }
            }
        }

        match best {
            Some((i, j, distance)) if distance <= max_distance => {
                let merged_members = [members[i].clone(), members[j].clone()].concat();
                let merged_centroid = mean_vector(
                    &merged_members
                        .iter()
                        .map(|index| &points[*index].1)
                        .collect::<Vec<_>>(),
                );
                // Remove j first so i's index stays valid
                members.remove(j);
                centroids.remove(j);
                members[i] = merged_members;
                centroids[i] = merged_centroid;
            }
            _ => break,
        }
    }

    let clusters = members
        .iter()
        .zip(&centroids)
        .enumerate()
        .map(|(index, (member_indices, centroid))| Cluster {
            label: format!("cluster-{index}"),
            item_ids: member_indices.iter().map(|i| points[*i].0.clone()).collect(),
            centroid: centroid.clone(),
        })
        .collect();

    ClusteringOutcome {
        algorithm: ClusteringAlgorithm::Hierarchical,
        clusters,
        unclustered: Vec::new(),
    }
}

fn dbscan(points: &[(String, Vec<f32>)], threshold: f64) -> ClusteringOutcome {
    let eps = 1.0 - threshold;
    let min_pts = 2usize;
    let n = points.len();

    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|j| *j != i && cosine_distance(&points[i].1, &points[*j].1) <= eps)
                .collect()
        })
        .collect();

    let mut cluster_of: Vec<Option<usize>> = vec![None; n];
    let mut visited: HashSet<usize> = HashSet::new();
    let mut cluster_count = 0usize;

    for start in 0..n {
        if visited.contains(&start) {
            continue;
        }
        visited.insert(start);

        if neighbors[start].len() + 1 < min_pts {
            continue; // noise unless adopted later
        }

        let cluster_index = cluster_count;
        cluster_count += 1;
        cluster_of[start] = Some(cluster_index);

        let mut frontier: Vec<usize> = neighbors[start].clone();
        while let Some(point) = frontier.pop() {
            if cluster_of[point].is_none() {
                cluster_of[point] = Some(cluster_index);
            }
            if visited.insert(point) && neighbors[point].len() + 1 >= min_pts {
                frontier.extend(neighbors[point].iter().copied());
            }
        }
    }

    let mut clusters: Vec<Cluster> = (0..cluster_count)
        .map(|cluster_index| {
            let member_indices: Vec<usize> = (0..n)
                .filter(|i| cluster_of[*i] == Some(cluster_index))
                .collect();
            let centroid =
                mean_vector(&member_indices.iter().map(|i| &points[*i].1).collect::<Vec<_>>());
            Cluster {
                label: format!("cluster-{cluster_index}"),
                item_ids: member_indices.iter().map(|i| points[*i].0.clone()).collect(),
                centroid,
            }
        })
        .collect();
    clusters.retain(|c| !c.item_ids.is_empty());

    let unclustered = (0..n)
        .filter(|i| cluster_of[*i].is_none())
        .map(|i| points[i].0.clone())
        .collect();

    ClusteringOutcome {
        algorithm: ClusteringAlgorithm::Dbscan,
        clusters,
        unclustered,
    }
}

fn mean_vector(vectors: &[&Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let dims = vectors[0].len();
    let mut mean = vec![0.0f32; dims];
    for vector in vectors {
        for (index, value) in vector.iter().enumerate().take(dims) {
            mean[index] += value;
        }
    }
    for value in &mut mean {
        *value /= vectors.len() as f32;
    }
    mean
}
