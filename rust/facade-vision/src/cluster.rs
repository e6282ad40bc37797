// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Greedy one-dimensional gap clustering
//!
//! Story detection (window vertical centers) and bay detection (window
//! horizontal centers) share this policy: sort the values and start a new
//! cluster whenever the gap to the previous value reaches the threshold.

/// A run of sorted values whose consecutive gaps stay below the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster1D {
    /// Indices into the input slice, in ascending value order
    pub members: Vec<usize>,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl Cluster1D {
    fn from_members(members: Vec<usize>, values: &[f64]) -> Self {
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut sum = 0.0;
        for &i in &members {
            min = min.min(values[i]);
            max = max.max(values[i]);
            sum += values[i];
        }
        let mean = sum / members.len() as f64;
        Self {
            members,
            min,
            max,
            mean,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Cluster `values` greedily; clusters come back ordered by value.
///
/// Non-finite values are ignored. Identical values always share a cluster,
/// so cluster means are strictly increasing.
pub fn greedy_gap_clusters(values: &[f64], threshold: f64) -> Vec<Cluster1D> {
    let threshold = threshold.max(f64::EPSILON);

    let mut order: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut clusters = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for idx in order {
        match current.last() {
            Some(&prev) if values[idx] - values[prev] >= threshold => {
                let done = std::mem::take(&mut current);
                clusters.push(Cluster1D::from_members(done, values));
                current.push(idx);
            }
            _ => current.push(idx),
        }
    }
    if !current.is_empty() {
        clusters.push(Cluster1D::from_members(current, values));
    }

    clusters
}

/// Gap threshold derived from typical element size
///
/// An explicit `absolute` threshold wins; otherwise `factor` times the mean
/// of `sizes` (0 for no sizes).
pub fn gap_threshold(sizes: &[f64], factor: f64, absolute: Option<f64>) -> f64 {
    if let Some(t) = absolute {
        return t;
    }
    if sizes.is_empty() {
        return 0.0;
    }
    factor * sizes.iter().sum::<f64>() / sizes.len() as f64
}
