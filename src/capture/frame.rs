use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use sha2::{Digest, Sha256};

/// 静止画のJPEG品質
pub const JPEG_QUALITY: u8 = 80;

/// 撮影した静止画（JPEG）
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    /// 疑似映像から生成した場合 true
    pub simulated: bool,
}

impl Frame {
    pub fn from_image(image: &RgbImage, captured_at: DateTime<Utc>, simulated: bool) -> Result<Self> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(image)?;

        Ok(Self {
            jpeg,
            width: image.width(),
            height: image.height(),
            captured_at,
            simulated,
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }

    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.to_base64())
    }

    /// JPEGバイト列のSHA-256（16進）
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.jpeg))
    }

    pub fn decode(&self) -> Result<RgbImage> {
        Ok(image::load_from_memory(&self.jpeg)?.to_rgb8())
    }
}
