//! 疑似映像
//!
//! カメラが使えないときの代替。撮影時刻から決定的に生成するので、
//! 同じ時刻なら同じ画像になる。

use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SIMULATED_WIDTH: u32 = 640;
pub const SIMULATED_HEIGHT: u32 = 480;

/// 縞模様の幅（px）
const STRIPE_WIDTH: u32 = 24;
/// ノイズ振幅
const NOISE: i16 = 10;

#[derive(Debug, Clone, Copy)]
pub struct SimulatedFeed {
    width: u32,
    height: u32,
}

impl Default for SimulatedFeed {
    fn default() -> Self {
        Self::new(SIMULATED_WIDTH, SIMULATED_HEIGHT)
    }
}

impl SimulatedFeed {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// ヘアライン鋼板風の画像を生成
    ///
    /// 横方向の明度勾配に、時刻とともに流れる縞と走査線を重ねる
    pub fn render(&self, at: DateTime<Utc>) -> RgbImage {
        let millis = at.timestamp_millis();
        let mut rng = StdRng::seed_from_u64(millis as u64);

        let (width, height) = (self.width, self.height);
        let phase = (millis / 40).rem_euclid(i64::from(STRIPE_WIDTH * 2)) as u32;
        let scan_y = (millis / 10).rem_euclid(i64::from(height)) as u32;

        RgbImage::from_fn(width, height, |x, y| {
            if y == scan_y {
                return Rgb([90, 230, 210]);
            }
            if x == width / 2 || y == height / 2 {
                return Rgb([60, 200, 120]);
            }

            let gradient = 140 + (x * 50 / width) as i16;
            let stripe = if ((x + phase) / STRIPE_WIDTH) % 2 == 0 { 14 } else { 0 };
            let noise = rng.gen_range(-NOISE..=NOISE);
            let v = (gradient + stripe + noise).clamp(0, 255) as u8;
            // 青みがかった金属色
            Rgb([v, v, v.saturating_add(8)])
        })
    }
}
