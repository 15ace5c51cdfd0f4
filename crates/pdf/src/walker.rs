//! 内容流状态机
//!
//! 跟踪 CTM、文本矩阵和文本状态参数，计算每个字形和每次 XObject 绘制在
//! 用户空间中的位置。字形宽度来自当前字体的度量，搜索和删除共用同一份
//! 字形框，保证搜索命中的矩形能准确覆盖被删除的字形。

use super::fonts::{load_fonts, FontMap, FontMetrics};
use super::types::MarkRect;
use super::utils::{get_number, get_xobjects, resolve_dict};
use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

pub type Matrix = [f32; 6];

pub const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// 字形框在字形空间中的下沿与上沿（以字号为单位）
const GLYPH_DESCENT: f32 = -0.2;
const GLYPH_ASCENT: f32 = 0.8;

/// 行向量约定下的 m × n
pub fn multiply(m: &Matrix, n: &Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

pub fn apply(m: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

/// 把矩形四个角变换后取外接矩形
pub fn transform_rect(m: &Matrix, x0: f32, y0: f32, x1: f32, y1: f32) -> MarkRect {
    let corners = [
        apply(m, x0, y0),
        apply(m, x1, y0),
        apply(m, x0, y1),
        apply(m, x1, y1),
    ];
    MarkRect::bounding(&corners).unwrap_or(MarkRect::from_corners(x0, y0, x1, y1))
}

pub(crate) fn matrix_from_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut m = IDENTITY;
    for (slot, operand) in m.iter_mut().zip(operands.iter()) {
        *slot = get_number(operand)?;
    }
    Some(m)
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Option<Rc<FontMetrics>>,
    /// Tf 的字号，可以为负
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    /// Tz / 100
    h_scale: f32,
    leading: f32,
    rise: f32,
}

impl GraphicsState {
    fn with_ctm(ctm: Matrix) -> Self {
        Self {
            ctm,
            font: None,
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

/// 单个字形
#[derive(Debug, Clone)]
pub struct GlyphBox {
    pub code: u32,
    /// 在字符串操作数中的字节范围
    pub span: Range<usize>,
    /// 解码后的文本，连字可能对应多个字符
    pub text: String,
    pub rect: MarkRect,
    /// 基线起点（用户空间）
    pub origin: (f32, f32),
    pub font_size: f32,
    /// 删除该字形时，为保持后续字形位置需在 TJ 中插入的数值；字号为 0 时无法表示
    pub tj_adjust: Option<f32>,
}

impl GlyphBox {
    pub fn is_blank(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }
}

/// XObject 类型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XObjectKind {
    Image,
    /// 表单：对象 ID、BBox 与 Matrix
    Form {
        id: ObjectId,
        bbox: [f32; 4],
        matrix: Matrix,
    },
    Other,
}

/// 一次操作在页面上绘制的内容
#[derive(Debug, Clone)]
pub enum Painted {
    /// 文本：每个字符串操作数对应一组字形
    Text(Vec<Vec<GlyphBox>>),
    XObject {
        name: Vec<u8>,
        rect: MarkRect,
        kind: XObjectKind,
        /// 绘制时的 CTM
        ctm: Matrix,
    },
}

/// 内容流可用的资源
#[derive(Debug, Default)]
pub struct ResourceScope {
    /// 资源字典副本（已解析间接引用）
    pub dict: Option<Dictionary>,
    pub fonts: FontMap,
    pub xobjects: HashMap<Vec<u8>, XObjectKind>,
}

impl ResourceScope {
    pub fn load(doc: &Document, resources: Option<&Dictionary>) -> Self {
        let xobject_dict = resources.and_then(|res| get_xobjects(doc, res));
        Self {
            dict: resources.cloned(),
            fonts: load_fonts(doc, resources),
            xobjects: classify_xobjects(doc, xobject_dict.as_ref()),
        }
    }
}

/// 内容流状态机
pub struct ContentWalker<'a> {
    scope: &'a ResourceScope,
    fallback_font: Rc<FontMetrics>,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    in_text_object: bool,
}

impl<'a> ContentWalker<'a> {
    pub fn new(scope: &'a ResourceScope) -> Self {
        Self::with_ctm(scope, IDENTITY)
    }

    /// 以给定 CTM 开始，用于表单 XObject 的内容
    pub fn with_ctm(scope: &'a ResourceScope, ctm: Matrix) -> Self {
        Self {
            scope,
            fallback_font: Rc::new(FontMetrics::default()),
            state: GraphicsState::with_ctm(ctm),
            stack: Vec::new(),
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            in_text_object: false,
        }
    }

    /// 处理一条操作，返回其绘制的内容（若有）
    pub fn step(&mut self, op: &Operation) -> Option<Painted> {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => {
                self.stack.push(self.state.clone());
                None
            }
            "Q" => {
                if let Some(saved) = self.stack.pop() {
                    self.state = saved;
                }
                None
            }
            "cm" => {
                if let Some(m) = matrix_from_operands(operands) {
                    self.state.ctm = multiply(&m, &self.state.ctm);
                }
                None
            }
            "BT" => {
                self.in_text_object = true;
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
                None
            }
            "ET" => {
                self.in_text_object = false;
                None
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.state.font = self.scope.fonts.get(name).cloned();
                    if self.state.font.is_none() {
                        log::debug!("[PDF] 未找到字体 {}，按估算宽度处理", String::from_utf8_lossy(name));
                    }
                }
                if let Some(size) = operands.get(1).and_then(get_number) {
                    self.state.font_size = size;
                }
                None
            }
            "Tc" => {
                if let Some(v) = operands.first().and_then(get_number) {
                    self.state.char_spacing = v;
                }
                None
            }
            "Tw" => {
                if let Some(v) = operands.first().and_then(get_number) {
                    self.state.word_spacing = v;
                }
                None
            }
            "Tz" => {
                if let Some(v) = operands.first().and_then(get_number) {
                    self.state.h_scale = v / 100.0;
                }
                None
            }
            "TL" => {
                if let Some(v) = operands.first().and_then(get_number) {
                    self.state.leading = v;
                }
                None
            }
            "Ts" => {
                if let Some(v) = operands.first().and_then(get_number) {
                    self.state.rise = v;
                }
                None
            }
            "Tm" => {
                if let Some(m) = matrix_from_operands(operands) {
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
                None
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(get_number),
                    operands.get(1).and_then(get_number),
                ) {
                    if op.operator == "TD" {
                        self.state.leading = -ty;
                    }
                    self.next_line(tx, ty);
                }
                None
            }
            "T*" => {
                self.next_line(0.0, -self.state.leading);
                None
            }
            "Tj" if self.in_text_object => {
                let glyphs = match operands.first() {
                    Some(Object::String(bytes, _)) => self.show(bytes),
                    _ => Vec::new(),
                };
                Some(Painted::Text(vec![glyphs]))
            }
            "'" if self.in_text_object => {
                self.next_line(0.0, -self.state.leading);
                let glyphs = match operands.first() {
                    Some(Object::String(bytes, _)) => self.show(bytes),
                    _ => Vec::new(),
                };
                Some(Painted::Text(vec![glyphs]))
            }
            "\"" if self.in_text_object => {
                if let Some(aw) = operands.first().and_then(get_number) {
                    self.state.word_spacing = aw;
                }
                if let Some(ac) = operands.get(1).and_then(get_number) {
                    self.state.char_spacing = ac;
                }
                self.next_line(0.0, -self.state.leading);
                let glyphs = match operands.get(2) {
                    Some(Object::String(bytes, _)) => self.show(bytes),
                    _ => Vec::new(),
                };
                Some(Painted::Text(vec![glyphs]))
            }
            "TJ" if self.in_text_object => {
                let mut groups = Vec::new();
                if let Some(Object::Array(items)) = operands.first() {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => groups.push(self.show(bytes)),
                            other => {
                                if let Some(adjust) = get_number(other) {
                                    let tx = -adjust / 1000.0 * self.state.font_size * self.state.h_scale;
                                    self.advance(tx);
                                }
                            }
                        }
                    }
                }
                Some(Painted::Text(groups))
            }
            "Do" => {
                let name = match operands.first() {
                    Some(Object::Name(name)) => name.clone(),
                    _ => return None,
                };
                let ctm = self.state.ctm;
                let kind = self.scope.xobjects.get(&name).copied().unwrap_or(XObjectKind::Other);
                let rect = match kind {
                    XObjectKind::Form { bbox, matrix, .. } => {
                        let m = multiply(&matrix, &ctm);
                        transform_rect(&m, bbox[0], bbox[1], bbox[2], bbox[3])
                    }
                    // 图片占据单位正方形
                    _ => transform_rect(&ctm, 0.0, 0.0, 1.0, 1.0),
                };
                Some(Painted::XObject { name, rect, kind, ctm })
            }
            _ => None,
        }
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply(&[1.0, 0.0, 0.0, 1.0, tx, ty], &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn advance(&mut self, tx: f32) {
        self.text_matrix = multiply(&[1.0, 0.0, 0.0, 1.0, tx, 0.0], &self.text_matrix);
    }

    /// 计算字符串中每个字符码的字形框，并推进文本矩阵
    fn show(&mut self, bytes: &[u8]) -> Vec<GlyphBox> {
        let font = Rc::clone(self.state.font.as_ref().unwrap_or(&self.fallback_font));
        let fs = self.state.font_size;
        let th = self.state.h_scale;
        let codes = font.codes(bytes);
        let mut glyphs = Vec::with_capacity(codes.len());

        for (code, start, len) in codes {
            let text_space = multiply(&self.text_matrix, &self.state.ctm);
            let trm = multiply(&[fs * th, 0.0, 0.0, fs, 0.0, self.state.rise], &text_space);
            let width = font.width(code);
            glyphs.push(GlyphBox {
                code,
                span: start..start + len,
                text: font.text(code),
                rect: transform_rect(&trm, 0.0, GLYPH_DESCENT, width, GLYPH_ASCENT),
                origin: apply(&trm, 0.0, 0.0),
                font_size: fs.abs(),
                tj_adjust: None,
            });

            let mut spacing = self.state.char_spacing;
            if font.is_word_space(code, len) {
                spacing += self.state.word_spacing;
            }
            if fs.abs() > f32::EPSILON {
                if let Some(glyph) = glyphs.last_mut() {
                    glyph.tj_adjust = Some(-(width * 1000.0 + spacing * 1000.0 / fs));
                }
            }
            self.advance((width * fs + spacing) * th);
        }
        glyphs
    }
}

/// 从 XObject 字典中识别每个名称的类型
pub fn classify_xobjects(doc: &Document, xobjects: Option<&Dictionary>) -> HashMap<Vec<u8>, XObjectKind> {
    let mut kinds = HashMap::new();
    let Some(xobjects) = xobjects else {
        return kinds;
    };
    for (name, obj) in xobjects.iter() {
        let dict = match resolve_dict(doc, obj) {
            Some(dict) => dict,
            None => continue,
        };
        let kind = match (dict.get(b"Subtype"), obj) {
            (Ok(Object::Name(subtype)), _) if subtype.as_slice() == b"Image" => XObjectKind::Image,
            // 表单流必须是间接对象
            (Ok(Object::Name(subtype)), Object::Reference(id)) if subtype.as_slice() == b"Form" => {
                let bbox = match dict.get(b"BBox") {
                    Ok(Object::Array(arr)) if arr.len() == 4 => {
                        let values: Vec<f32> = arr.iter().filter_map(get_number).collect();
                        if values.len() == 4 {
                            [values[0], values[1], values[2], values[3]]
                        } else {
                            [0.0, 0.0, 1.0, 1.0]
                        }
                    }
                    _ => [0.0, 0.0, 1.0, 1.0],
                };
                let matrix = match dict.get(b"Matrix") {
                    Ok(Object::Array(arr)) => matrix_from_operands(arr).unwrap_or(IDENTITY),
                    _ => IDENTITY,
                };
                XObjectKind::Form { id: *id, bbox, matrix }
            }
            _ => XObjectKind::Other,
        };
        kinds.insert(name.clone(), kind);
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn walk(scope: &ResourceScope, ops: Vec<Operation>) -> Vec<Painted> {
        let mut walker = ContentWalker::new(scope);
        ops.iter().filter_map(|op| walker.step(op)).collect()
    }

    fn text_line(font: &str, size: i64, text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), Object::Integer(size)]),
            Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn glyphs_of(painted: &[Painted]) -> Vec<GlyphBox> {
        painted
            .iter()
            .filter_map(|p| match p {
                Painted::Text(groups) => Some(groups.iter().flatten().cloned().collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_multiply_translation() {
        let t = multiply(&[1.0, 0.0, 0.0, 1.0, 10.0, 5.0], &[2.0, 0.0, 0.0, 2.0, 1.0, 1.0]);
        assert_eq!(apply(&t, 0.0, 0.0), (21.0, 11.0));
    }

    #[test]
    fn test_unknown_font_uses_estimate() {
        let scope = ResourceScope::default();
        let glyphs = glyphs_of(&walk(&scope, text_line("F1", 10, "AB")));
        assert_eq!(glyphs.len(), 2);
        assert_eq!(glyphs[0].origin, (100.0, 700.0));
        assert!((glyphs[1].origin.0 - 105.5).abs() < 1e-3);
        assert!(glyphs[0].rect.contains_point(102.0, 703.0));
        assert_eq!(glyphs[1].text, "B");
    }

    #[test]
    fn test_font_widths_drive_advance() {
        let doc = Document::with_version("1.5");
        let resources = dictionary! {
            "Font" => dictionary! {
                "W1" => dictionary! {
                    "Subtype" => "TrueType",
                    "BaseFont" => "Wide",
                    "FirstChar" => 65,
                    "Widths" => vec![Object::Integer(1000), Object::Integer(250)],
                },
            },
        };
        let scope = ResourceScope::load(&doc, Some(&resources));
        let glyphs = glyphs_of(&walk(&scope, text_line("W1", 12, "ABA")));

        assert_eq!(glyphs[1].origin.0, 112.0);
        assert_eq!(glyphs[2].origin.0, 115.0);
        assert!((glyphs[0].rect.width - 12.0).abs() < 1e-3);
        assert_eq!(glyphs[1].tj_adjust, Some(-250.0));
    }

    #[test]
    fn test_char_spacing_in_tj_adjust() {
        let scope = ResourceScope::default();
        let mut ops = text_line("F1", 10, "A B");
        ops.insert(1, Operation::new("Tc", vec![Object::Integer(2)]));
        ops.insert(1, Operation::new("Tw", vec![Object::Integer(5)]));
        let glyphs = glyphs_of(&walk(&scope, ops));

        // 550 + 2 * 1000 / 10
        assert_eq!(glyphs[0].tj_adjust, Some(-750.0));
        // 空格额外包含词间距
        assert_eq!(glyphs[1].tj_adjust, Some(-1250.0));
        assert!((glyphs[2].origin.0 - (100.0 + 7.5 + 12.5)).abs() < 1e-3);
    }

    #[test]
    fn test_state_restored_after_q() {
        let scope = ResourceScope::default();
        let painted = walk(
            &scope,
            vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    [1, 0, 0, 1, 50, 50].iter().map(|v| Object::Integer(*v)).collect(),
                ),
                Operation::new("Q", vec![]),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            ],
        );
        let Painted::XObject { rect, kind, .. } = &painted[0] else {
            panic!("expected xobject");
        };
        assert_eq!(*rect, MarkRect::from_corners(0.0, 0.0, 1.0, 1.0));
        assert_eq!(*kind, XObjectKind::Other);
    }
}
