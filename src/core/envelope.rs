use serde::{Deserialize, Serialize};

/// 二维轴对齐包围盒
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// 构造时自动交换颠倒的坐标
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn intersection(&self, other: &Envelope) -> Option<Envelope> {
        if !self.intersects(other) {
            return None;
        }
        Some(Envelope {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// 扩展为同时包含 `other`
    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }
}

/// 合并一组 envelope；空输入返回 None
pub fn union_all<'a>(envs: impl IntoIterator<Item = &'a Envelope>) -> Option<Envelope> {
    let mut it = envs.into_iter();
    let mut acc = *it.next()?;
    for e in it {
        acc.expand_to_include(e);
    }
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_and_area() {
        let a = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let b = Envelope::new(50.0, 50.0, 150.0, 150.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Envelope::new(50.0, 50.0, 100.0, 100.0));
        assert_eq!(i.area(), 2500.0);

        let far = Envelope::new(200.0, 200.0, 300.0, 300.0);
        assert!(a.intersection(&far).is_none());
    }

    #[test]
    fn swapped_corners_are_normalized() {
        let e = Envelope::new(10.0, 10.0, 0.0, 0.0);
        assert_eq!(e.min_x, 0.0);
        assert_eq!(e.max_y, 10.0);
    }

    #[test]
    fn union_of_points() {
        let pts = [Envelope::point(1.0, 5.0), Envelope::point(-2.0, 3.0)];
        assert_eq!(union_all(&pts), Some(Envelope::new(-2.0, 3.0, 1.0, 5.0)));
        assert_eq!(union_all(&[] as &[Envelope]), None);
    }
}
