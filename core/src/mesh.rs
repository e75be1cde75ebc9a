//! Triangle mesh input.
//!
//! The mesh only lives long enough to be turned into per-layer segments;
//! the pipeline drops it as soon as S1 completes.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),
    #[error("model contains no triangles")]
    Empty,
}

/// One triangle, vertices in file order.
#[derive(Copy, Clone, Debug)]
pub struct Triangle {
    pub v: [[f64; 3]; 3],
}

impl Triangle {
    pub fn min_z(&self) -> f64 {
        self.v[0][2].min(self.v[1][2]).min(self.v[2][2])
    }

    pub fn max_z(&self) -> f64 {
        self.v[0][2].max(self.v[1][2]).max(self.v[2][2])
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub triangles: Vec<Triangle>,
}

impl Mesh {
    /// Read an STL file. A single dash reads standard input.
    pub fn from_stl(path: &str) -> Result<Mesh, MeshError> {
        let mut data = Vec::new();
        if path == "-" {
            std::io::stdin().lock().read_to_end(&mut data)?;
        } else {
            File::open(Path::new(path))?.read_to_end(&mut data)?;
        }
        let stl = stl_io::read_stl(&mut Cursor::new(data))?;
        let mut triangles = Vec::with_capacity(stl.faces.len());
        for face in &stl.faces {
            let mut v = [[0.0; 3]; 3];
            for (slot, &vi) in v.iter_mut().zip(face.vertices.iter()) {
                let p = stl.vertices[vi];
                *slot = [p[0] as f64, p[1] as f64, p[2] as f64];
            }
            triangles.push(Triangle { v });
        }
        if triangles.is_empty() {
            return Err(MeshError::Empty);
        }
        Ok(Mesh { triangles })
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// (min, max) corners over every vertex.
    pub fn bounds(&self) -> ([f64; 3], [f64; 3]) {
        let mut lo = [f64::MAX; 3];
        let mut hi = [f64::MIN; 3];
        for t in &self.triangles {
            for v in &t.v {
                for a in 0..3 {
                    lo[a] = lo[a].min(v[a]);
                    hi[a] = hi[a].max(v[a]);
                }
            }
        }
        (lo, hi)
    }

    pub fn translate(&mut self, dx: f64, dy: f64, dz: f64) {
        for t in &mut self.triangles {
            for v in &mut t.v {
                v[0] += dx;
                v[1] += dy;
                v[2] += dz;
            }
        }
    }

    /// Drop the model onto the build plate and apply placement: the lowest
    /// vertex lands at z = 0, then the model is lowered by `z_chop` (slicing
    /// ignores everything below zero), then translated in x/y.
    pub fn place(&mut self, x_translate: f64, y_translate: f64, z_chop: f64) {
        let (lo, _) = self.bounds();
        self.translate(x_translate, y_translate, -lo[2] - z_chop);
    }

    pub fn max_z(&self) -> f64 {
        self.bounds().1[2]
    }
}

/// Synthetic meshes used by tests and examples.
pub mod shapes {
    use super::*;

    /// Axis-aligned box with outward-facing CCW triangles.
    pub fn cuboid(origin: [f64; 3], size: [f64; 3]) -> Mesh {
        let [x0, y0, z0] = origin;
        let [sx, sy, sz] = size;
        let x1 = x0 + sx;
        let y1 = y0 + sy;
        let z1 = z0 + sz;
        let corners = [
            [x0, y0, z0],
            [x1, y0, z0],
            [x1, y1, z0],
            [x0, y1, z0],
            [x0, y0, z1],
            [x1, y0, z1],
            [x1, y1, z1],
            [x0, y1, z1],
        ];
        // Quads as two triangles each, CCW seen from outside.
        let quads = [
            [0, 3, 2, 1], // bottom (normal -z)
            [4, 5, 6, 7], // top (+z)
            [0, 1, 5, 4], // front (-y)
            [1, 2, 6, 5], // right (+x)
            [2, 3, 7, 6], // back (+y)
            [3, 0, 4, 7], // left (-x)
        ];
        let mut triangles = Vec::new();
        for q in &quads {
            triangles.push(Triangle {
                v: [corners[q[0]], corners[q[1]], corners[q[2]]],
            });
            triangles.push(Triangle {
                v: [corners[q[0]], corners[q[2]], corners[q[3]]],
            });
        }
        Mesh { triangles }
    }

    /// Truncated pyramid: square base of `base_size` at z = 0, square top
    /// of `top_size` at `height`, both centered on the same axis. A top
    /// wider than the base makes every wall an overhang.
    pub fn frustum(center: [f64; 2], base_size: f64, top_size: f64, height: f64) -> Mesh {
        let ring = |size: f64, z: f64| -> [[f64; 3]; 4] {
            let h = size / 2.0;
            [
                [center[0] - h, center[1] - h, z],
                [center[0] + h, center[1] - h, z],
                [center[0] + h, center[1] + h, z],
                [center[0] - h, center[1] + h, z],
            ]
        };
        let b = ring(base_size, 0.0);
        let t = ring(top_size, height);
        let mut triangles = vec![
            // Bottom, facing -z.
            Triangle { v: [b[0], b[2], b[1]] },
            Triangle { v: [b[0], b[3], b[2]] },
            // Top, facing +z.
            Triangle { v: [t[0], t[1], t[2]] },
            Triangle { v: [t[0], t[2], t[3]] },
        ];
        for i in 0..4 {
            let j = (i + 1) % 4;
            triangles.push(Triangle { v: [b[i], b[j], t[j]] });
            triangles.push(Triangle { v: [b[i], t[j], t[i]] });
        }
        Mesh { triangles }
    }

    /// Square-based pyramid with the apex centered `height` above the base.
    pub fn pyramid(base_origin: [f64; 2], base_size: f64, height: f64) -> Mesh {
        let [x0, y0] = base_origin;
        let x1 = x0 + base_size;
        let y1 = y0 + base_size;
        let apex = [x0 + base_size / 2.0, y0 + base_size / 2.0, height];
        let b = [
            [x0, y0, 0.0],
            [x1, y0, 0.0],
            [x1, y1, 0.0],
            [x0, y1, 0.0],
        ];
        let mut triangles = vec![
            Triangle { v: [b[0], b[2], b[1]] },
            Triangle { v: [b[0], b[3], b[2]] },
        ];
        for i in 0..4 {
            triangles.push(Triangle {
                v: [b[i], b[(i + 1) % 4], apex],
            });
        }
        Mesh { triangles }
    }
}
