/// PDF 用户空间中的矩形（左下角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl MarkRect {
    /// 由两个对角点构造
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    /// 点集的外接矩形
    pub fn bounding(points: &[(f32, f32)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let (mut x0, mut y0) = *first;
        let (mut x1, mut y1) = *first;
        for &(x, y) in rest {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        Some(Self::from_corners(x0, y0, x1, y1))
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains_point(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.right() && py >= self.y && py <= self.top()
    }

    /// 检查两个矩形是否相交（边界接触不算）
    pub fn intersects(&self, other: &MarkRect) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.top()
            && self.top() > other.y
    }

    pub fn union(&self, other: &MarkRect) -> MarkRect {
        MarkRect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.top().max(other.top()),
        )
    }
}

/// 文本搜索命中
#[derive(Debug, Clone, PartialEq)]
pub struct TextHit {
    /// 页码，从 0 开始
    pub page: usize,
    pub rect: MarkRect,
}
