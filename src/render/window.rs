use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use minifb::{Key, Window, WindowOptions};

use crate::landmarks::{FaceLandmarks, HandLandmarks, HAND_CONNECTIONS};
use crate::render::{EYE_COLOR, FACE_COLOR, HAND_COLOR};
use crate::tracking::TrackingFrame;

/// minifbを使用したデバッグ表示
pub struct MinifbRenderer {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl MinifbRenderer {
    /// ウィンドウを作成
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;

        let buffer = vec![0u32; width * height];

        Ok(Self {
            window,
            buffer,
            width,
            height,
        })
    }

    /// ウィンドウが開いているか
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    /// カラー画像をウィンドウサイズに縮小してバッファにコピー
    pub fn draw_frame(&mut self, frame: &RgbImage) {
        let resized;
        let frame = if frame.dimensions() == (self.width as u32, self.height as u32) {
            frame
        } else {
            resized = image::imageops::resize(frame, self.width as u32, self.height as u32, FilterType::Triangle);
            &resized
        };

        for (x, y, pixel) in frame.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            self.buffer[y as usize * self.width + x as usize] = ((r as u32) << 16) | ((g as u32) << 8) | b as u32;
        }
    }

    /// 検出結果を重ねる
    ///
    /// ランドマークは検出画像の座標なので、元のカラー画像の幅から表示倍率を求める。
    pub fn draw_tracking(&mut self, frame: &TrackingFrame, color_width: u32) {
        let to_window = self.width as f32 / color_width.max(1) as f32;

        if let Some(ref face) = frame.face {
            self.draw_face(face, face.scale() * to_window);
        }
        if let Some(ref hand) = frame.hand {
            self.draw_hand(hand, hand.scale() * to_window);
        }
    }

    fn draw_face(&mut self, face: &FaceLandmarks, scale: f32) {
        for p in face.points() {
            self.draw_circle((p.x * scale) as i32, (p.y * scale) as i32, 2, FACE_COLOR);
        }
        for (x, y) in [face.left_eye_pixel(), face.right_eye_pixel()] {
            self.draw_circle((x * scale) as i32, (y * scale) as i32, 5, EYE_COLOR);
        }
    }

    fn draw_hand(&mut self, hand: &HandLandmarks, scale: f32) {
        let points = hand.pixel_points();
        for (start, end) in HAND_CONNECTIONS.iter() {
            let a = points[*start as usize];
            let b = points[*end as usize];
            self.draw_line(
                (a.x * scale) as i32,
                (a.y * scale) as i32,
                (b.x * scale) as i32,
                (b.y * scale) as i32,
                HAND_COLOR,
            );
        }
    }

    /// バッファをウィンドウに表示
    pub fn update(&mut self) -> Result<()> {
        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)?;
        Ok(())
    }

    /// Bresenhamのアルゴリズムで線を描画
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            self.set_pixel(x, y, color);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// 円を描画（塗りつぶし）
    fn draw_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u32) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// ピクセルをセット（境界チェック付き）
    fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.buffer[y as usize * self.width + x as usize] = color;
        }
    }
}
