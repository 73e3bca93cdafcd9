//! Uniform bucket grid over element bounding boxes.

use tc_mesh::Point;

pub(crate) struct BucketGrid {
    lo: Point,
    cell: [f64; 3],
    dims: [usize; 3],
    buckets: Vec<Vec<usize>>,
}

impl BucketGrid {
    pub(crate) fn build(boxes: &[(Point, Point)], dim: usize) -> Self {
        let mut lo = [f64::MAX; 3];
        let mut hi = [f64::MIN; 3];
        for (a, b) in boxes {
            for d in 0..3 {
                lo[d] = lo[d].min(a[d]);
                hi[d] = hi[d].max(b[d]);
            }
        }
        if boxes.is_empty() {
            lo = [0.0; 3];
            hi = [0.0; 3];
        }
        let per_axis = (boxes.len() as f64).powf(1.0 / dim.max(1) as f64).ceil().max(1.0) as usize;
        let mut dims = [1usize; 3];
        let mut cell = [1.0; 3];
        for d in 0..dim.min(3) {
            let span = hi[d] - lo[d];
            if span > 0.0 {
                dims[d] = per_axis;
                cell[d] = span / per_axis as f64;
            }
        }

        let mut grid = Self {
            lo,
            cell,
            dims,
            buckets: vec![Vec::new(); dims[0] * dims[1] * dims[2]],
        };
        for (i, (a, b)) in boxes.iter().enumerate() {
            let ia = grid.coords(a);
            let ib = grid.coords(b);
            for z in ia[2]..=ib[2] {
                for y in ia[1]..=ib[1] {
                    for x in ia[0]..=ib[0] {
                        let k = grid.flat([x, y, z]);
                        grid.buckets[k].push(i);
                    }
                }
            }
        }
        grid
    }

    fn coords(&self, p: &Point) -> [usize; 3] {
        let mut c = [0usize; 3];
        for d in 0..3 {
            let t = ((p[d] - self.lo[d]) / self.cell[d]).floor();
            c[d] = if t.is_finite() && t > 0.0 {
                (t as usize).min(self.dims[d] - 1)
            } else {
                0
            };
        }
        c
    }

    fn flat(&self, c: [usize; 3]) -> usize {
        (c[2] * self.dims[1] + c[1]) * self.dims[0] + c[0]
    }

    /// Elements whose box overlaps the bucket of `p` (clamped to the grid).
    pub(crate) fn candidates(&self, p: &Point) -> &[usize] {
        &self.buckets[self.flat(self.coords(p))]
    }
}

pub(crate) fn bounding_box(points: &[Point]) -> (Point, Point) {
    let mut lo = [f64::MAX; 3];
    let mut hi = [f64::MIN; 3];
    for p in points {
        for d in 0..3 {
            lo[d] = lo[d].min(p[d]);
            hi[d] = hi[d].max(p[d]);
        }
    }
    (lo, hi)
}

pub(crate) fn dist2(a: &Point, b: &Point) -> f64 {
    (0..3).map(|d| (a[d] - b[d]).powi(2)).sum()
}
