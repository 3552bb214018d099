// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/element.rs - 界面元素与解析结果定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq)]
pub enum ElementError {
  #[error("bbox must be an array of 4 numbers, got {0}")]
  MalformedBbox(String),
  #[error("field '{field}' has unexpected value {value}")]
  InvalidField { field: &'static str, value: String },
}

/// 元素类别，未知标签统一归为 `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
  Icon,
  Text,
  #[default]
  #[serde(other)]
  Unknown,
}

impl ElementKind {
  pub fn from_tag(tag: &str) -> Self {
    match tag {
      "icon" => ElementKind::Icon,
      "text" => ElementKind::Text,
      _ => ElementKind::Unknown,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ElementKind::Icon => "icon",
      ElementKind::Text => "text",
      ElementKind::Unknown => "unknown",
    }
  }
}

/// 模型返回的结构化检测项，字段保持原样，缺省值在归一化时补齐
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredItem {
  pub kind: Option<String>,
  pub bbox: Option<[f64; 4]>,
  pub interactivity: Option<bool>,
  pub content: Option<String>,
  pub source: Option<String>,
}

/// 模型返回的原始检测项
///
/// 新版模型返回结构化记录；旧版模型只返回一段描述文本，
/// 这种形状作为兼容路径保留，不会被强制转换成结构化记录。
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
  Structured(StructuredItem),
  Legacy(String),
}

impl RawItem {
  /// 形状不符的字段按缺省值处理并记录警告，其余检测项照常返回
  pub fn from_value(value: Value) -> Self {
    match value {
      Value::Object(map) => RawItem::Structured(structured_from_map(map)),
      Value::String(text) => RawItem::Legacy(text),
      other => RawItem::Legacy(other.to_string()),
    }
  }
}

fn structured_from_map(mut map: Map<String, Value>) -> StructuredItem {
  let kind = optional_string(map.remove("type"));
  let content = optional_string(map.remove("content"));
  let source = optional_string(map.remove("source"));

  let interactivity = match map.remove("interactivity") {
    None | Some(Value::Null) => None,
    Some(Value::Bool(flag)) => Some(flag),
    Some(other) => {
      let err = ElementError::InvalidField {
        field: "interactivity",
        value: other.to_string(),
      };
      warn!("检测项字段无效，按缺省值处理: {}", err);
      None
    }
  };

  let bbox = match map.remove("bbox") {
    None | Some(Value::Null) => None,
    Some(value) => parse_bbox(&value)
      .inspect_err(|e| warn!("检测项字段无效，按缺省值处理: {}", e))
      .ok(),
  };

  StructuredItem {
    kind,
    bbox,
    interactivity,
    content,
    source,
  }
}

fn optional_string(value: Option<Value>) -> Option<String> {
  match value {
    None | Some(Value::Null) => None,
    Some(Value::String(text)) => Some(text),
    Some(other) => Some(other.to_string()),
  }
}

fn parse_bbox(value: &Value) -> Result<[f64; 4], ElementError> {
  let malformed = || ElementError::MalformedBbox(value.to_string());
  let coords = value.as_array().ok_or_else(malformed)?;
  if coords.len() != 4 {
    return Err(malformed());
  }

  let mut bbox = [0.0f64; 4];
  for (slot, coord) in bbox.iter_mut().zip(coords) {
    *slot = coord.as_f64().ok_or_else(malformed)?;
  }
  Ok(bbox)
}

/// 结构化元素的对外形状，字段名沿用既有客户端的约定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredElement {
  #[serde(rename = "type")]
  pub kind: ElementKind,
  /// 归一化坐标 [x1, y1, x2, y2]，原样透传，不做截断
  pub bbox: [f64; 4],
  #[serde(rename = "interactivity")]
  pub interactive: bool,
  #[serde(rename = "content")]
  pub caption: String,
  pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementContent {
  Structured(StructuredElement),
  Legacy(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedElement {
  pub id: usize,
  pub content: ElementContent,
}

impl DetectedElement {
  pub fn from_raw(id: usize, item: RawItem) -> Self {
    let content = match item {
      RawItem::Structured(item) => ElementContent::Structured(StructuredElement {
        kind: item
          .kind
          .as_deref()
          .map(ElementKind::from_tag)
          .unwrap_or_default(),
        bbox: item.bbox.unwrap_or([0.0; 4]),
        interactive: item.interactivity.unwrap_or(false),
        caption: item.content.unwrap_or_default(),
        source: item.source.unwrap_or_default(),
      }),
      RawItem::Legacy(text) => ElementContent::Legacy(text),
    };
    DetectedElement { id, content }
  }

  pub fn kind(&self) -> ElementKind {
    match &self.content {
      ElementContent::Structured(element) => element.kind,
      ElementContent::Legacy(_) => ElementKind::Unknown,
    }
  }

  pub fn bbox(&self) -> Option<&[f64; 4]> {
    match &self.content {
      ElementContent::Structured(element) => Some(&element.bbox),
      ElementContent::Legacy(_) => None,
    }
  }

  /// 元素的文字描述：结构化元素取 caption，旧格式取整段文本
  pub fn text(&self) -> &str {
    match &self.content {
      ElementContent::Structured(element) => &element.caption,
      ElementContent::Legacy(text) => text,
    }
  }

  pub fn is_interactive(&self) -> bool {
    match &self.content {
      ElementContent::Structured(element) => element.interactive,
      ElementContent::Legacy(_) => false,
    }
  }
}

/// 按模型给出的顺序编号，不排序
pub fn normalize(items: Vec<RawItem>) -> Vec<DetectedElement> {
  items
    .into_iter()
    .enumerate()
    .map(|(id, item)| DetectedElement::from_raw(id, item))
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResponse {
  pub success: bool,
  pub image_size: ImageSize,
  pub element_count: usize,
  pub elements: Vec<DetectedElement>,
  pub labeled_image: String,
}

impl ParseResponse {
  pub fn new(image_size: ImageSize, elements: Vec<DetectedElement>, labeled_image: String) -> Self {
    Self {
      success: true,
      image_size,
      element_count: elements.len(),
      elements,
      labeled_image,
    }
  }

  /// 查找文字中包含 `needle` 的元素（不区分大小写）
  pub fn find_by_text(&self, needle: &str) -> Vec<&DetectedElement> {
    let needle = needle.to_lowercase();
    self
      .elements
      .iter()
      .filter(|element| element.text().to_lowercase().contains(&needle))
      .collect()
  }

  /// 返回包含像素坐标 (x, y) 的第一个元素
  pub fn element_at_point(&self, x: f64, y: f64) -> Option<&DetectedElement> {
    let ImageSize { width, height } = self.image_size;
    if width == 0 || height == 0 {
      return None;
    }

    let nx = x / width as f64;
    let ny = y / height as f64;
    self.elements.iter().find(|element| match element.bbox() {
      Some(&[x1, y1, x2, y2]) => nx >= x1 && nx <= x2 && ny >= y1 && ny <= y2,
      None => false,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn raw(value: Value) -> RawItem {
    RawItem::from_value(value)
  }

  #[test]
  fn structured_item_maps_every_field() {
    let item = raw(json!({
      "type": "icon",
      "bbox": [0.1, 0.2, 0.3, 0.4],
      "interactivity": true,
      "content": "Settings",
      "source": "box_yolo_content_yolo"
    }));
    let element = DetectedElement::from_raw(3, item);

    assert_eq!(element.id, 3);
    assert_eq!(element.kind(), ElementKind::Icon);
    assert_eq!(element.bbox(), Some(&[0.1, 0.2, 0.3, 0.4]));
    assert!(element.is_interactive());
    assert_eq!(element.text(), "Settings");
  }

  #[test]
  fn structured_item_defaults() {
    let element = DetectedElement::from_raw(0, raw(json!({})));
    let ElementContent::Structured(content) = element.content else {
      panic!("expected structured element");
    };
    assert_eq!(content.kind, ElementKind::Unknown);
    assert_eq!(content.bbox, [0.0; 4]);
    assert!(!content.interactive);
    assert_eq!(content.caption, "");
    assert_eq!(content.source, "");
  }

  #[test]
  fn unrecognised_kind_becomes_unknown() {
    let element = DetectedElement::from_raw(0, raw(json!({"type": "checkbox"})));
    assert_eq!(element.kind(), ElementKind::Unknown);
  }

  #[test]
  fn bbox_outside_unit_range_is_not_clamped() {
    let element = DetectedElement::from_raw(0, raw(json!({"bbox": [-0.5, 0.2, 1.7, 0.1]})));
    assert_eq!(element.bbox(), Some(&[-0.5, 0.2, 1.7, 0.1]));
  }

  #[test]
  fn malformed_bbox_falls_back_to_default() {
    for bbox in [json!([0.1, 0.2]), json!([0.1, "a", 0.3, 0.4]), json!("0,0,1,1")] {
      let element = DetectedElement::from_raw(0, raw(json!({"bbox": bbox, "content": "gear"})));
      assert_eq!(element.bbox(), Some(&[0.0; 4]));
      assert_eq!(element.text(), "gear");
    }
  }

  #[test]
  fn bbox_shape_is_checked() {
    assert!(matches!(
      parse_bbox(&json!([1, 2, 3])),
      Err(ElementError::MalformedBbox(_))
    ));
    assert_eq!(parse_bbox(&json!([0, 0.5, 1, 1])).unwrap(), [0.0, 0.5, 1.0, 1.0]);
  }

  #[test]
  fn non_bool_interactivity_is_treated_as_absent() {
    let element = DetectedElement::from_raw(0, raw(json!({"interactivity": "yes", "type": "icon"})));
    assert!(!element.is_interactive());
    assert_eq!(element.kind(), ElementKind::Icon);
  }

  #[test]
  fn legacy_string_is_kept_as_is() {
    let element = DetectedElement::from_raw(1, raw(json!("Text Box ID 1: Submit")));
    assert_eq!(element.content, ElementContent::Legacy("Text Box ID 1: Submit".into()));
    assert_eq!(element.bbox(), None);
    assert_eq!(
      serde_json::to_value(&element).unwrap(),
      json!({"id": 1, "content": "Text Box ID 1: Submit"})
    );
  }

  #[test]
  fn structured_serialises_with_wire_names() {
    let element = DetectedElement::from_raw(
      0,
      raw(json!({"type": "text", "bbox": [0.0, 0.0, 0.5, 0.5], "content": "OK"})),
    );
    assert_eq!(
      serde_json::to_value(&element).unwrap(),
      json!({
        "id": 0,
        "content": {
          "type": "text",
          "bbox": [0.0, 0.0, 0.5, 0.5],
          "interactivity": false,
          "content": "OK",
          "source": ""
        }
      })
    );
  }

  #[test]
  fn normalize_keeps_adapter_order() {
    let items = vec![
      raw(json!({"content": "b"})),
      raw(json!("a")),
      raw(json!({"content": "c"})),
    ];
    let elements = normalize(items);
    let ids: Vec<usize> = elements.iter().map(|e| e.id).collect();
    let texts: Vec<&str> = elements.iter().map(|e| e.text()).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(texts, vec!["b", "a", "c"]);
  }

  #[test]
  fn response_counts_elements() {
    let elements = normalize(vec![raw(json!("x")), raw(json!("y"))]);
    let response = ParseResponse::new(ImageSize { width: 10, height: 20 }, elements, String::new());
    assert!(response.success);
    assert_eq!(response.element_count, response.elements.len());
  }

  #[test]
  fn find_by_text_is_case_insensitive() {
    let elements = normalize(vec![
      raw(json!({"content": "Open File"})),
      raw(json!("legacy: open folder")),
      raw(json!({"content": "Close"})),
    ]);
    let response = ParseResponse::new(ImageSize { width: 1, height: 1 }, elements, String::new());
    let hits: Vec<usize> = response.find_by_text("OPEN").iter().map(|e| e.id).collect();
    assert_eq!(hits, vec![0, 1]);
  }

  #[test]
  fn element_at_point_uses_normalised_coordinates() {
    let elements = normalize(vec![
      raw(json!("no bbox")),
      raw(json!({"bbox": [0.0, 0.0, 0.5, 0.5]})),
      raw(json!({"bbox": [0.5, 0.5, 1.0, 1.0]})),
    ]);
    let response = ParseResponse::new(
      ImageSize {
        width: 200,
        height: 100,
      },
      elements,
      String::new(),
    );
    assert_eq!(response.element_at_point(50.0, 25.0).map(|e| e.id), Some(1));
    assert_eq!(response.element_at_point(150.0, 75.0).map(|e| e.id), Some(2));

    let empty = ParseResponse::new(ImageSize { width: 0, height: 0 }, Vec::new(), String::new());
    assert!(empty.element_at_point(1.0, 1.0).is_none());
  }
}
