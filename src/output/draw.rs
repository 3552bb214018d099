// 该文件是 Shanan-Omni （山南西风·界面解析） 项目的一部分。
// src/output/draw.rs - 界面元素检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::{debug, info};

use crate::{
  element::{DetectedElement, ElementKind},
  output::OutputError,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 18;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 1;
const BOX_THICKNESS: i32 = 2;

const ICON_COLOR: [u8; 3] = [255, 48, 48]; // 红色
const TEXT_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const UNKNOWN_COLOR: [u8; 3] = [0, 160, 0]; // 绿色

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  thickness: i32,
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      thickness: BOX_THICKNESS,
      font: None,
    }
  }
}

impl Draw {
  /// 加载标签字体；未提供字体时只绘制边框
  pub fn with_font_file(path: &Path) -> Result<Self, OutputError> {
    info!("加载标注字体: {}", path.display());
    let data = std::fs::read(path)?;
    let font =
      FontArc::try_from_vec(data).map_err(|_| OutputError::InvalidFont(path.to_path_buf()))?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn color_of(kind: ElementKind) -> [u8; 3] {
    match kind {
      ElementKind::Icon => ICON_COLOR,
      ElementKind::Text => TEXT_COLOR,
      ElementKind::Unknown => UNKNOWN_COLOR,
    }
  }

  // 在图像上绘制一个矩形边框，bbox 为归一化坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f64; 4], label: &str, color: [u8; 3]) {
    let (w, h) = (image.width() as f64, image.height() as f64);
    if w < 1.0 || h < 1.0 {
      return;
    }

    // 越界坐标只在绘制时截断，返回给调用方的坐标保持原样
    let x_min = ((bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    let Some(font) = &self.font else {
      return;
    };

    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签放在边框左上角外侧，空间不足时贴边
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let max_width = (w as i32 - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, Rgb(color));
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }

  /// 按元素编号绘制检测框，旧格式元素没有坐标，跳过
  pub fn draw_elements(&self, image: &mut RgbImage, elements: &[DetectedElement]) {
    let mut drawn = 0usize;
    for element in elements {
      if let Some(bbox) = element.bbox() {
        let color = Self::color_of(element.kind());
        self.draw_bbox_with_label(image, bbox, &element.id.to_string(), color);
        drawn += 1;
      }
    }
    debug!("绘制检测框 {} 个", drawn);
  }
}
