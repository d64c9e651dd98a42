//! Connected-component labeling and per-component geometry.
//!
//! Components are extracted with face (6-neighbour) connectivity, matching
//! the labeling convention the rest of the pipeline was calibrated against.

use std::collections::VecDeque;

use ndarray::Array3;

/// One connected component of a binary mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Label value in the array returned by [`label_components`] (from 1).
    pub label: u32,
    pub voxel_count: usize,
    /// Axis-aligned bounding box, inclusive on both ends.
    pub bbox_min: [usize; 3],
    pub bbox_max: [usize; 3],
    /// Center of mass in voxel coordinates.
    pub centroid: [f64; 3],
}

impl Component {
    /// Physical volume in millilitres given the voxel volume in mm^3.
    pub fn volume_ml(&self, voxel_volume_mm3: f64) -> f64 {
        self.voxel_count as f64 * voxel_volume_mm3 * 1e-3
    }

    /// Bounding-box extent in voxels along each axis.
    pub fn bbox_extent(&self) -> [usize; 3] {
        [
            self.bbox_max[0] - self.bbox_min[0] + 1,
            self.bbox_max[1] - self.bbox_min[1] + 1,
            self.bbox_max[2] - self.bbox_min[2] + 1,
        ]
    }
}

/// Labels the connected components of a binary mask with 6-connectivity.
///
/// Returns the label volume (0 = background) and the component descriptors in
/// label order.
pub fn label_components(mask: &Array3<u8>) -> (Array3<u32>, Vec<Component>) {
    let shape = mask.dim();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for x in 0..shape.0 {
        for y in 0..shape.1 {
            for z in 0..shape.2 {
                if mask[[x, y, z]] == 0 || labels[[x, y, z]] != 0 {
                    continue;
                }
                let label = components.len() as u32 + 1;
                let mut voxel_count = 0usize;
                let mut bbox_min = [x, y, z];
                let mut bbox_max = [x, y, z];
                let mut coord_sum = [0f64; 3];

                labels[[x, y, z]] = label;
                queue.push_back([x, y, z]);
                while let Some(v) = queue.pop_front() {
                    voxel_count += 1;
                    for axis in 0..3 {
                        bbox_min[axis] = bbox_min[axis].min(v[axis]);
                        bbox_max[axis] = bbox_max[axis].max(v[axis]);
                        coord_sum[axis] += v[axis] as f64;
                    }
                    for (axis, step) in [(0, -1), (0, 1), (1, -1), (1, 1), (2, -1), (2, 1)] {
                        let mut n = v;
                        let moved = if step < 0 {
                            match n[axis].checked_sub(1) {
                                Some(c) => {
                                    n[axis] = c;
                                    true
                                }
                                None => false,
                            }
                        } else {
                            n[axis] += 1;
                            n[axis] < [shape.0, shape.1, shape.2][axis]
                        };
                        if moved && mask[n] != 0 && labels[n] == 0 {
                            labels[n] = label;
                            queue.push_back(n);
                        }
                    }
                }

                components.push(Component {
                    label,
                    voxel_count,
                    bbox_min,
                    bbox_max,
                    centroid: [
                        coord_sum[0] / voxel_count as f64,
                        coord_sum[1] / voxel_count as f64,
                        coord_sum[2] / voxel_count as f64,
                    ],
                });
            }
        }
    }
    (labels, components)
}

/// The component with the largest voxel count; ties keep the lowest label.
pub fn main_component(components: &[Component]) -> Option<&Component> {
    components.iter().max_by(|a, b| {
        a.voxel_count
            .cmp(&b.voxel_count)
            .then(b.label.cmp(&a.label))
    })
}

/// Long and short axis lengths (millimetres) of the ellipsoid fitted to one
/// component, from the eigenvalues of the spacing-scaled coordinate
/// covariance. For a uniform solid ellipsoid the full axis length along an
/// eigenvector is `2 * sqrt(5 * eigenvalue)`.
pub fn ellipsoid_axes(labels: &Array3<u32>, label: u32, spacing: [f64; 3]) -> (f64, f64) {
    let mut n = 0usize;
    let mut mean = [0f64; 3];
    for ((x, y, z), &l) in labels.indexed_iter() {
        if l == label {
            n += 1;
            mean[0] += x as f64 * spacing[0];
            mean[1] += y as f64 * spacing[1];
            mean[2] += z as f64 * spacing[2];
        }
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    for m in &mut mean {
        *m /= n as f64;
    }

    let mut cov = [[0f64; 3]; 3];
    for ((x, y, z), &l) in labels.indexed_iter() {
        if l == label {
            let d = [
                x as f64 * spacing[0] - mean[0],
                y as f64 * spacing[1] - mean[1],
                z as f64 * spacing[2] - mean[2],
            ];
            for i in 0..3 {
                for j in 0..3 {
                    cov[i][j] += d[i] * d[j];
                }
            }
        }
    }
    for row in &mut cov {
        for v in row.iter_mut() {
            *v /= n as f64;
        }
    }

    let eig = sym_eigenvalues(cov);
    let long = 2.0 * (5.0 * eig[0].max(0.0)).sqrt();
    let short = 2.0 * (5.0 * eig[2].max(0.0)).sqrt();
    (long, short)
}

/// Eigenvalues of a symmetric 3x3 matrix in descending order, via the
/// trigonometric closed form.
fn sym_eigenvalues(m: [[f64; 3]; 3]) -> [f64; 3] {
    let p1 = m[0][1] * m[0][1] + m[0][2] * m[0][2] + m[1][2] * m[1][2];
    if p1 == 0.0 {
        let mut diag = [m[0][0], m[1][1], m[2][2]];
        diag.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        return diag;
    }
    let q = (m[0][0] + m[1][1] + m[2][2]) / 3.0;
    let p2 = (m[0][0] - q).powi(2) + (m[1][1] - q).powi(2) + (m[2][2] - q).powi(2) + 2.0 * p1;
    let p = (p2 / 6.0).sqrt();
    let mut b = m;
    for i in 0..3 {
        b[i][i] -= q;
        for v in &mut b[i] {
            *v /= p;
        }
    }
    let det_b = b[0][0] * (b[1][1] * b[2][2] - b[1][2] * b[2][1])
        - b[0][1] * (b[1][0] * b[2][2] - b[1][2] * b[2][0])
        + b[0][2] * (b[1][0] * b[2][1] - b[1][1] * b[2][0]);
    let r = (det_b / 2.0).clamp(-1.0, 1.0);
    let phi = r.acos() / 3.0;
    let eig1 = q + 2.0 * p * phi.cos();
    let eig3 = q + 2.0 * p * (phi + 2.0 * std::f64::consts::PI / 3.0).cos();
    let eig2 = 3.0 * q - eig1 - eig3;
    [eig1, eig2, eig3]
}
