use crate::glam::Vec3A;

/// Segments closer to parallel with a plane than this (by `|n · d|`) are treated as missing it.
const PARALLEL_EPSILON: f32 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub start: Vec3A,
    pub end: Vec3A,
}

impl Segment {
    pub fn new(start: Vec3A, end: Vec3A) -> Self {
        Self { start, end }
    }

    pub fn direction(&self) -> Vec3A {
        self.end - self.start
    }

    pub fn position_at(&self, t: f32) -> Vec3A {
        self.start + t * self.direction()
    }
}

/// A planar quad `v0 v1 v3 v2`, where `v3` is the corner opposite `v0`. It is tested as the triangle pair `(v0, v1, v2)` and
/// `(v3, v1, v2)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub v: [Vec3A; 4],
    /// Not normalized. Points along `(v1 - v0) × (v2 - v0)`.
    pub normal: Vec3A,
}

impl Quad {
    pub fn new(v0: Vec3A, v1: Vec3A, v2: Vec3A, v3: Vec3A) -> Self {
        Self {
            v: [v0, v1, v2, v3],
            normal: (v1 - v0).cross(v2 - v0),
        }
    }

    /// Returns the point where `segment` crosses this quad, if it does.
    pub fn intersect_segment(&self, segment: &Segment) -> Option<Vec3A> {
        let [v0, v1, v2, v3] = self.v;
        intersect_triangle(v0, v1, v2, self.normal, segment).or_else(|| intersect_triangle(v3, v1, v2, self.normal, segment))
    }
}

/// Ray-plane intersection restricted to the segment, followed by a barycentric containment test for triangle `(v0, v1, v2)`.
/// `n` is any normal of the triangle's plane.
pub fn intersect_triangle(v0: Vec3A, v1: Vec3A, v2: Vec3A, n: Vec3A, segment: &Segment) -> Option<Vec3A> {
    let dir = segment.direction();
    let b = n.dot(dir);
    if b.abs() < PARALLEL_EPSILON {
        return None;
    }
    let r = -n.dot(segment.start - v0) / b;
    if !(0.0..=1.0).contains(&r) {
        return None;
    }
    let i = segment.position_at(r);

    let u = v1 - v0;
    let v = v2 - v0;
    let w = i - v0;
    let uu = u.dot(u);
    let uv = u.dot(v);
    let vv = v.dot(v);
    let wu = w.dot(u);
    let wv = w.dot(v);
    let d = uv * uv - uu * vv;
    if d == 0.0 {
        return None;
    }

    let s = (uv * wv - vv * wu) / d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    let t = (uv * wu - uu * wv) / d;
    if t < 0.0 || s + t > 1.0 {
        return None;
    }
    Some(i)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    use approx::assert_relative_eq;

    fn unit_quad_at_y(y: f32) -> Quad {
        Quad::new(
            Vec3A::new(0.0, y, 0.0),
            Vec3A::new(0.0, y, 1.0),
            Vec3A::new(1.0, y, 0.0),
            Vec3A::new(1.0, y, 1.0),
        )
    }

    #[test]
    fn normal_follows_winding() {
        assert_relative_eq!(unit_quad_at_y(0.0).normal.y, 1.0);
    }

    #[test]
    fn segment_through_both_triangles() {
        let quad = unit_quad_at_y(0.5);
        let seg = Segment::new(Vec3A::new(0.25, 0.0, 0.25), Vec3A::new(0.25, 2.0, 0.25));
        let i = quad.intersect_segment(&seg).unwrap();
        assert_relative_eq!(i.y, 0.5);

        let seg = Segment::new(Vec3A::new(0.9, 1.0, 0.9), Vec3A::new(0.9, 0.0, 0.9));
        let i = quad.intersect_segment(&seg).unwrap();
        assert_relative_eq!(i.x, 0.9);
        assert_relative_eq!(i.y, 0.5);
    }

    #[test]
    fn segment_too_short_or_outside() {
        let quad = unit_quad_at_y(0.5);
        let short = Segment::new(Vec3A::new(0.5, 0.0, 0.5), Vec3A::new(0.5, 0.4, 0.5));
        assert_eq!(quad.intersect_segment(&short), None);
        let outside = Segment::new(Vec3A::new(1.5, 0.0, 0.5), Vec3A::new(1.5, 1.0, 0.5));
        assert_eq!(quad.intersect_segment(&outside), None);
    }

    #[test]
    fn parallel_segment_misses() {
        let quad = unit_quad_at_y(0.5);
        let seg = Segment::new(Vec3A::new(0.0, 0.5, 0.5), Vec3A::new(1.0, 0.5, 0.5));
        assert_eq!(quad.intersect_segment(&seg), None);
    }
}
