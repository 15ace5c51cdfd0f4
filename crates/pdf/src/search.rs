//! 页面文本层搜索
//!
//! 按绘制顺序收集页面上的全部字形（包括表单 XObject 内绘制的字形），
//! 相邻字形之间根据位置插入虚拟空格或换行，然后在字符序列上做字面匹配。
//! 换行不会参与匹配，所以命中总在同一行内。

use super::types::MarkRect;
use super::utils::get_form;
use super::walker::{multiply, ContentWalker, GlyphBox, Matrix, Painted, ResourceScope, XObjectKind, IDENTITY};
use lopdf::content::Content;
use lopdf::{Document, ObjectId};

/// 表单 XObject 的最大嵌套深度
pub const MAX_FORM_DEPTH: usize = 12;

/// 页面的文本层
#[derive(Debug, Default)]
pub struct PageText {
    glyphs: Vec<GlyphBox>,
    /// 字符及其所属字形；虚拟分隔符没有字形
    chars: Vec<(char, Option<usize>)>,
}

impl PageText {
    pub fn new(doc: &Document, content: &Content, scope: &ResourceScope) -> Self {
        let mut page = Self::default();
        page.collect(doc, content, scope, IDENTITY, &mut Vec::new());
        page
    }

    fn collect(
        &mut self,
        doc: &Document,
        content: &Content,
        scope: &ResourceScope,
        ctm: Matrix,
        forms: &mut Vec<ObjectId>,
    ) {
        let mut walker = ContentWalker::with_ctm(scope, ctm);
        for op in &content.operations {
            match walker.step(op) {
                Some(Painted::Text(groups)) => {
                    for glyph in groups.into_iter().flatten() {
                        self.push_glyph(glyph);
                    }
                }
                Some(Painted::XObject {
                    kind: XObjectKind::Form { id, matrix, .. },
                    ctm,
                    ..
                }) => self.collect_form(doc, id, &matrix, &ctm, scope, forms),
                _ => {}
            }
        }
    }

    fn collect_form(
        &mut self,
        doc: &Document,
        id: ObjectId,
        matrix: &Matrix,
        ctm: &Matrix,
        scope: &ResourceScope,
        forms: &mut Vec<ObjectId>,
    ) {
        if forms.contains(&id) || forms.len() >= MAX_FORM_DEPTH {
            log::warn!("[PDF] 表单 {:?} 嵌套过深或循环引用，跳过", id);
            return;
        }
        let Some(form) = get_form(doc, id) else {
            return;
        };
        let content = match Content::decode(&form.content) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("[PDF] 无法解析表单 {:?}: {}", id, e);
                return;
            }
        };

        // 表单没有自己的资源时沿用上级资源
        let own_scope;
        let form_scope = match &form.resources {
            Some(resources) => {
                own_scope = ResourceScope::load(doc, Some(resources));
                &own_scope
            }
            None => scope,
        };

        forms.push(id);
        self.collect(doc, &content, form_scope, multiply(matrix, ctm), forms);
        forms.pop();
    }

    fn push_glyph(&mut self, glyph: GlyphBox) {
        if let Some(prev) = self.glyphs.last() {
            if let Some(separator) = separator_between(prev, &glyph) {
                self.chars.push((separator, None));
            }
        }
        let index = self.glyphs.len();
        self.chars.extend(glyph.text.chars().map(|c| (c, Some(index))));
        self.glyphs.push(glyph);
    }

    /// 文本层的纯文本形式
    pub fn text(&self) -> String {
        self.chars.iter().map(|(c, _)| *c).collect()
    }

    /// 查找词条的所有出现位置，每次出现返回一个覆盖矩形
    pub fn find(&self, term: &str) -> Vec<MarkRect> {
        let needle: Vec<char> = term.chars().collect();
        if needle.is_empty() || needle.len() > self.chars.len() {
            return Vec::new();
        }

        let haystack: Vec<char> = self.chars.iter().map(|(c, _)| *c).collect();
        let mut hits = Vec::new();
        let mut start = 0;
        while start + needle.len() <= haystack.len() {
            if haystack[start..start + needle.len()] == needle[..] {
                let rect = self.chars[start..start + needle.len()]
                    .iter()
                    .filter_map(|(_, owner)| owner.map(|index| self.glyphs[index].rect))
                    .reduce(|acc, rect| acc.union(&rect));
                if let Some(rect) = rect {
                    hits.push(rect);
                }
                start += needle.len();
            } else {
                start += 1;
            }
        }
        hits
    }
}

/// 根据两个相邻字形的位置判断是否需要虚拟分隔符
fn separator_between(prev: &GlyphBox, next: &GlyphBox) -> Option<char> {
    let size = prev.font_size.max(next.font_size).max(1.0);
    let dy = (next.origin.1 - prev.origin.1).abs();
    if dy > size * 0.5 {
        return Some('\n');
    }
    let gap = next.rect.x - prev.rect.right();
    if gap > size * 0.25 {
        // 已有空格时不重复插入
        if prev.is_blank() || next.is_blank() {
            return None;
        }
        return Some(' ');
    }
    if gap < -size * 2.0 {
        return Some('\n');
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Object, Stream};

    fn line(x: i64, y: i64, text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
            Operation::new("Td", vec![Object::Integer(x), Object::Integer(y)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn page_text(operations: Vec<Operation>) -> PageText {
        let doc = Document::with_version("1.5");
        PageText::new(&doc, &Content { operations }, &ResourceScope::default())
    }

    #[test]
    fn test_find_single_run() {
        let page = page_text(line(72, 700, "SSN: 123-45-6789"));
        let hits = page.find("123-45-6789");
        assert_eq!(hits.len(), 1);
        // 未知字体按 0.55 估算，"SSN: " 共 5 个字符
        assert!((hits[0].x - (72.0 + 5.0 * 0.55 * 12.0)).abs() < 1e-3);
        assert!(page.find("987").is_empty());
    }

    #[test]
    fn test_find_across_kerned_tj() {
        let page = page_text(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
            Operation::new("Td", vec![Object::Integer(72), Object::Integer(700)]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Ja"),
                    Object::Integer(-20),
                    Object::string_literal("ne"),
                ])],
            ),
            Operation::new("ET", vec![]),
        ]);
        assert_eq!(page.find("Jane").len(), 1);
    }

    #[test]
    fn test_lines_do_not_join() {
        let mut operations = line(72, 700, "abc");
        operations.extend(line(72, 680, "def"));
        let page = page_text(operations);
        assert_eq!(page.text(), "abc\ndef");
        assert!(page.find("abcdef").is_empty());
        assert!(page.find("abc def").is_empty());
    }

    #[test]
    fn test_separate_words_get_virtual_space() {
        let mut operations = line(72, 700, "Jane");
        operations.extend(line(110, 700, "Doe"));
        let page = page_text(operations);
        assert_eq!(page.find("Jane Doe").len(), 1);
    }

    #[test]
    fn test_text_inside_form_is_found_in_page_space() {
        let mut doc = Document::with_version("1.5");
        let form_content = Content { operations: line(10, 20, "Hidden") }.encode().unwrap();
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(200), Object::Integer(50)],
                "Matrix" => vec![
                    Object::Integer(1), Object::Integer(0), Object::Integer(0),
                    Object::Integer(1), Object::Integer(100), Object::Integer(0),
                ],
            },
            form_content,
        ));
        let resources = dictionary! {
            "XObject" => dictionary! { "Fm0" => Object::Reference(form_id) },
        };
        let scope = ResourceScope::load(&doc, Some(&resources));
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    [1, 0, 0, 1, 0, 500].iter().map(|v| Object::Integer(*v)).collect(),
                ),
                Operation::new("Do", vec![Object::Name(b"Fm0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };

        let page = PageText::new(&doc, &content, &scope);
        let hits = page.find("Hidden");
        assert_eq!(hits.len(), 1);
        // 表单 Matrix 平移 (100, 0)，页面 cm 平移 (0, 500)
        assert!((hits[0].x - 110.0).abs() < 1e-3);
        assert!((hits[0].y - (520.0 - 0.2 * 12.0)).abs() < 1e-3);
    }

    #[test]
    fn test_self_referencing_form_terminates() {
        let mut doc = Document::with_version("1.5");
        let form_id = doc.new_object_id();
        let mut operations = line(0, 0, "loop");
        operations.push(Operation::new("Do", vec![Object::Name(b"Fm0".to_vec())]));
        let form = Stream::new(
            dictionary! {
                "Subtype" => "Form",
                "BBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(10), Object::Integer(10)],
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Fm0" => Object::Reference(form_id) },
                },
            },
            Content { operations }.encode().unwrap(),
        );
        doc.objects.insert(form_id, Object::Stream(form));

        let resources = dictionary! {
            "XObject" => dictionary! { "Fm0" => Object::Reference(form_id) },
        };
        let scope = ResourceScope::load(&doc, Some(&resources));
        let content = Content {
            operations: vec![Operation::new("Do", vec![Object::Name(b"Fm0".to_vec())])],
        };
        let page = PageText::new(&doc, &content, &scope);
        assert_eq!(page.find("loop").len(), 1);
    }
}
