use crate::{ImageProcError, Result};
use opencv::core::{Point, Point2f, Vector};

/// 共线判定使用的三角形面积阈值（像素²）。
const COLLINEAR_EPS: f64 = 1e-3;
/// 两点重合判定使用的距离阈值（像素）。
const COINCIDENT_EPS: f64 = 1e-3;

/// 四个角点，顺时针排列：左上、右上、右下、左下。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners(pub [Point2f; 4]);

impl Corners {
    /// 由轴对齐矩形构造角点。
    pub fn from_rect(x: i32, y: i32, width: i32, height: i32) -> Self {
        let (x1, y1) = (x as f32, y as f32);
        let (x2, y2) = ((x + width) as f32, (y + height) as f32);
        Self([
            Point2f::new(x1, y1),
            Point2f::new(x2, y1),
            Point2f::new(x2, y2),
            Point2f::new(x1, y2),
        ])
    }

    pub fn points(&self) -> &[Point2f; 4] {
        &self.0
    }

    /// 四个角点的质心 `(cx, cy)`。
    pub fn centroid(&self) -> (f64, f64) {
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0f64, 0.0f64), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
        (sx / 4.0, sy / 4.0)
    }

    /// 是否仍为轴对齐矩形（未经透视变换的角点满足该性质）。
    pub fn is_axis_aligned(&self) -> bool {
        let [tl, tr, br, bl] = self.0;
        tl.y == tr.y && bl.y == br.y && tl.x == bl.x && tr.x == br.x && tl.x < tr.x && tl.y < bl.y
    }

    /// 转为 OpenCV 的 `Vector<Point2f>`，供 `get_perspective_transform` 使用。
    pub fn to_vector(&self) -> Vector<Point2f> {
        Vector::from_iter(self.0)
    }

    /// 截断为整数像素坐标的多边形，用于掩码填充。
    pub fn to_int_polygon(&self) -> Vector<Point> {
        self.0
            .iter()
            .map(|p| Point::new(p.x as i32, p.y as i32))
            .collect()
    }

    /// 检查角点能否确定一个透视变换：坐标有限、两两不重合、任意三点不共线。
    pub fn validate(&self) -> Result<()> {
        let pts: Vec<(f64, f64)> = self.0.iter().map(|p| (p.x as f64, p.y as f64)).collect();

        if pts.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(ImageProcError::degenerate("角点坐标包含非有限值"));
        }

        for i in 0..4 {
            for j in (i + 1)..4 {
                let dist = ((pts[i].0 - pts[j].0).powi(2) + (pts[i].1 - pts[j].1).powi(2)).sqrt();
                if dist < COINCIDENT_EPS {
                    return Err(ImageProcError::degenerate(format!(
                        "角点 {i} 与角点 {j} 重合"
                    )));
                }
            }
        }

        for skip in 0..4 {
            let tri: Vec<(f64, f64)> = (0..4).filter(|&k| k != skip).map(|k| pts[k]).collect();
            let (a, b, c) = (tri[0], tri[1], tri[2]);
            let area2 = ((b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)).abs();
            if area2 < COLLINEAR_EPS {
                return Err(ImageProcError::degenerate(format!(
                    "除角点 {skip} 外的三个角点共线"
                )));
            }
        }

        Ok(())
    }
}

impl From<[(f32, f32); 4]> for Corners {
    fn from(points: [(f32, f32); 4]) -> Self {
        Self(points.map(|(x, y)| Point2f::new(x, y)))
    }
}
