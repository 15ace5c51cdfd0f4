//! 字体度量
//!
//! 从字体字典读取字形宽度和 ToUnicode 映射。简单字体使用 FirstChar/Widths，
//! Type0 字体使用后代 CID 字体的 DW/W，编码按双字节处理。
//! 没有宽度表的标准字体使用内置 AFM 宽度，其余情况按字号估算。

use super::utils::{get_number, get_stream_content, resolve, resolve_dict};
use lopdf::{Dictionary, Document, Object};
use std::collections::HashMap;
use std::rc::Rc;

/// 资源名 -> 字体度量
pub type FontMap = HashMap<Vec<u8>, Rc<FontMetrics>>;

/// W 数组和 bfrange 单个区间展开的上限
const MAX_RANGE_SPAN: u32 = 0x10000;

/// Helvetica 在 32..=126 的 AFM 宽度
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 222, 333, 333, 389, 584, 278, 333, 278, 278, //
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, //
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, //
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, //
    222, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, //
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

/// 单个字体的宽度与解码信息
#[derive(Debug, Clone)]
pub struct FontMetrics {
    /// 字符码 -> 宽度（文本空间，未乘字号）
    widths: HashMap<u32, f32>,
    /// 宽度表中缺失的字符码使用的宽度；None 表示估算
    missing_width: Option<f32>,
    /// 每个字符码的字节数
    code_len: usize,
    to_unicode: HashMap<u32, String>,
}

impl Default for FontMetrics {
    /// 没有字体信息时的估算字体
    fn default() -> Self {
        Self {
            widths: HashMap::new(),
            missing_width: None,
            code_len: 1,
            to_unicode: HashMap::new(),
        }
    }
}

impl FontMetrics {
    pub fn from_dict(doc: &Document, font: &Dictionary) -> Self {
        let mut metrics = match name_of(font, b"Subtype").as_deref() {
            Some(b"Type0") => Self::composite(doc, font),
            _ => Self::simple(doc, font),
        };
        if let Some(Object::Stream(stream)) = font.get(b"ToUnicode").ok().and_then(|o| resolve(doc, o)) {
            metrics.to_unicode = parse_to_unicode(&get_stream_content(stream));
        }
        metrics
    }

    fn simple(doc: &Document, font: &Dictionary) -> Self {
        let mut metrics = Self::default();

        // Type3 的宽度在字形空间，需要经过 FontMatrix 缩放
        let scale = match font.get(b"FontMatrix").ok().and_then(|o| resolve(doc, o)) {
            Some(Object::Array(arr)) => arr.first().and_then(get_number).unwrap_or(0.001),
            _ => 0.001,
        };

        let first_char = font.get(b"FirstChar").ok().and_then(|o| resolve(doc, o)).and_then(get_number);
        let widths = match font.get(b"Widths").ok().and_then(|o| resolve(doc, o)) {
            Some(Object::Array(arr)) => Some(arr),
            _ => None,
        };

        if let (Some(first_char), Some(widths)) = (first_char, widths) {
            let first_char = first_char.max(0.0) as u32;
            for (offset, width) in widths.iter().enumerate() {
                if let Some(width) = resolve(doc, width).and_then(get_number) {
                    metrics.widths.insert(first_char + offset as u32, width * scale);
                }
            }
            let missing = font
                .get(b"FontDescriptor")
                .ok()
                .and_then(|o| resolve_dict(doc, o))
                .and_then(|desc| desc.get(b"MissingWidth").ok())
                .and_then(|o| resolve(doc, o))
                .and_then(get_number)
                .unwrap_or(0.0);
            metrics.missing_width = Some(missing * scale);
            return metrics;
        }

        if let Some(base_font) = name_of(font, b"BaseFont") {
            metrics.apply_standard_widths(&base_font);
        }
        metrics
    }

    fn composite(doc: &Document, font: &Dictionary) -> Self {
        let mut metrics = Self {
            code_len: 2,
            missing_width: Some(1.0),
            ..Self::default()
        };

        let descendant = match font.get(b"DescendantFonts").ok().and_then(|o| resolve(doc, o)) {
            Some(Object::Array(arr)) => arr.first().and_then(|o| resolve_dict(doc, o)),
            _ => None,
        };
        let Some(descendant) = descendant else {
            log::debug!("[PDF] Type0 字体缺少 DescendantFonts，按默认宽度处理");
            return metrics;
        };

        if let Some(dw) = descendant.get(b"DW").ok().and_then(|o| resolve(doc, o)).and_then(get_number) {
            metrics.missing_width = Some(dw / 1000.0);
        }
        if let Some(Object::Array(w)) = descendant.get(b"W").ok().and_then(|o| resolve(doc, o)) {
            parse_cid_widths(doc, w, &mut metrics.widths);
        }
        metrics
    }

    /// 标准 14 字体在没有 Widths 时的内置宽度
    fn apply_standard_widths(&mut self, base_font: &[u8]) {
        // 去掉子集前缀 "ABCDEF+"
        let name = match base_font.iter().position(|&b| b == b'+') {
            Some(pos) => &base_font[pos + 1..],
            None => base_font,
        };
        if name.starts_with(b"Courier") {
            self.missing_width = Some(0.6);
        } else if matches!(
            name,
            b"Helvetica" | b"Helvetica-Oblique" | b"Arial" | b"ArialMT" | b"Arial-ItalicMT"
        ) {
            for (offset, width) in HELVETICA_WIDTHS.iter().enumerate() {
                self.widths.insert(32 + offset as u32, f32::from(*width) / 1000.0);
            }
        }
    }

    /// 把字符串拆分为字符码，返回 (字符码, 起始字节, 字节数)
    pub fn codes(&self, bytes: &[u8]) -> Vec<(u32, usize, usize)> {
        let mut codes = Vec::with_capacity(bytes.len() / self.code_len.max(1));
        let mut start = 0;
        while start < bytes.len() {
            let len = self.code_len.min(bytes.len() - start);
            let code = bytes[start..start + len]
                .iter()
                .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
            codes.push((code, start, len));
            start += len;
        }
        codes
    }

    /// 字符码的宽度（文本空间，未乘字号）
    pub fn width(&self, code: u32) -> f32 {
        match self.widths.get(&code) {
            Some(width) => *width,
            None => self.missing_width.unwrap_or(if code < 128 { 0.55 } else { 1.0 }),
        }
    }

    /// 字符码对应的文本
    pub fn text(&self, code: u32) -> String {
        if let Some(text) = self.to_unicode.get(&code) {
            return text.clone();
        }
        if self.code_len == 1 {
            // 单字节按 Latin-1 解码
            char::from_u32(code).map(String::from).unwrap_or_default()
        } else {
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// 词间距只作用于单字节编码的 32
    pub fn is_word_space(&self, code: u32, len: usize) -> bool {
        len == 1 && code == 32
    }
}

fn name_of(dict: &Dictionary, key: &[u8]) -> Option<Vec<u8>> {
    match dict.get(key) {
        Ok(Object::Name(name)) => Some(name.clone()),
        _ => None,
    }
}

/// 读取资源字典中的全部字体
pub fn load_fonts(doc: &Document, resources: Option<&Dictionary>) -> FontMap {
    let mut fonts = FontMap::new();
    let Some(font_dict) = resources
        .and_then(|res| res.get(b"Font").ok())
        .and_then(|o| resolve_dict(doc, o))
    else {
        return fonts;
    };
    for (name, obj) in font_dict.iter() {
        if let Some(font) = resolve_dict(doc, obj) {
            fonts.insert(name.clone(), Rc::new(FontMetrics::from_dict(doc, font)));
        }
    }
    fonts
}

/// 解析 CID 字体的 W 数组：`c [w1 w2 ...]` 或 `cfirst clast w`
fn parse_cid_widths(doc: &Document, w: &[Object], widths: &mut HashMap<u32, f32>) {
    let mut i = 0;
    while i < w.len() {
        let Some(first) = resolve(doc, &w[i]).and_then(get_number) else {
            break;
        };
        let first = first.max(0.0) as u32;
        match w.get(i + 1).and_then(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (offset, width) in list.iter().enumerate() {
                    if let Some(width) = resolve(doc, width).and_then(get_number) {
                        widths.insert(first + offset as u32, width / 1000.0);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(width)) = (
                    get_number(last),
                    w.get(i + 2).and_then(|o| resolve(doc, o)).and_then(get_number),
                ) else {
                    break;
                };
                let last = (last.max(0.0) as u32).min(first.saturating_add(MAX_RANGE_SPAN));
                for code in first..=last {
                    widths.insert(code, width / 1000.0);
                }
                i += 3;
            }
            None => break,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Hex(Vec<u8>),
    Open,
    Close,
    Word(Vec<u8>),
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || b"[]<>()/%{}".contains(&b)
}

fn decode_hex(digits: &[u8]) -> Vec<u8> {
    let nibbles: Vec<u8> = digits
        .iter()
        .filter_map(|&b| (b as char).to_digit(16).map(|d| d as u8))
        .collect();
    nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

fn tokenize(data: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b'<' if data.get(i + 1) == Some(&b'<') => i += 2,
            b'>' => i += 1,
            b'<' => {
                let end = data[i + 1..]
                    .iter()
                    .position(|&b| b == b'>')
                    .map_or(data.len(), |pos| i + 1 + pos);
                tokens.push(Token::Hex(decode_hex(&data[i + 1..end])));
                i = end + 1;
            }
            b'[' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b']' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b'(' => {
                // 字面字符串（CIDSystemInfo 等）直接跳过
                let mut depth = 0usize;
                while i < data.len() {
                    match data[i] {
                        b'\\' => i += 1,
                        b'(' => depth += 1,
                        b')' => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                i += 1;
                while i < data.len() && !is_delimiter(data[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(data[start..i].to_vec()));
            }
        }
    }
    tokens
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| (u16::from(pair[0]) << 8) | u16::from(pair.get(1).copied().unwrap_or(0)))
        .collect()
}

/// 解析 ToUnicode CMap 中的 bfchar 与 bfrange
pub fn parse_to_unicode(data: &[u8]) -> HashMap<u32, String> {
    let tokens = tokenize(data);
    let mut map = HashMap::new();
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            Token::Word(word) if word.as_slice() == b"beginbfchar" => {
                i += 1;
                while let (Some(Token::Hex(src)), Some(Token::Hex(dst))) = (tokens.get(i), tokens.get(i + 1)) {
                    map.insert(code_of(src), String::from_utf16_lossy(&utf16_units(dst)));
                    i += 2;
                }
            }
            Token::Word(word) if word.as_slice() == b"beginbfrange" => {
                i += 1;
                while let (Some(Token::Hex(lo)), Some(Token::Hex(hi))) = (tokens.get(i), tokens.get(i + 1)) {
                    let lo = code_of(lo);
                    let hi = code_of(hi).min(lo.saturating_add(MAX_RANGE_SPAN));
                    match tokens.get(i + 2) {
                        Some(Token::Hex(dst)) => {
                            let base = utf16_units(dst);
                            for code in lo..=hi {
                                let mut units = base.clone();
                                if let Some(last) = units.last_mut() {
                                    *last = last.wrapping_add((code - lo) as u16);
                                }
                                map.insert(code, String::from_utf16_lossy(&units));
                            }
                            i += 3;
                        }
                        Some(Token::Open) => {
                            i += 3;
                            let mut code = lo;
                            while let Some(Token::Hex(dst)) = tokens.get(i) {
                                if code <= hi {
                                    map.insert(code, String::from_utf16_lossy(&utf16_units(dst)));
                                }
                                code += 1;
                                i += 1;
                            }
                            if tokens.get(i) == Some(&Token::Close) {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
            }
            _ => i += 1,
        }
    }
    map
}
