use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ImageEncoding {
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }

    fn from_mime(value: &str) -> Result<Self> {
        match value {
            "image/png" => Ok(ImageEncoding::Png),
            "image/jpeg" => Ok(ImageEncoding::Jpeg),
            other => Err(anyhow!("unsupported image mime type '{other}'")),
        }
    }
}

/// Encoded image bytes. Persisted inline as a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodedImage {
    pub encoding: ImageEncoding,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn new(encoding: ImageEncoding, bytes: Vec<u8>) -> Self {
        Self { encoding, bytes }
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.encoding.mime(),
            STANDARD.encode(&self.bytes)
        )
    }

    pub fn from_data_url(value: &str) -> Result<Self> {
        let Some(rest) = value.strip_prefix("data:") else {
            bail!("image payload is not a data URL");
        };
        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| anyhow!("image data URL is not base64 encoded"))?;
        let encoding = ImageEncoding::from_mime(mime)?;
        let bytes = STANDARD
            .decode(payload)
            .context("invalid base64 in image data URL")?;
        Ok(Self { encoding, bytes })
    }

    pub fn dimensions(&self) -> Result<(u32, u32)> {
        image::ImageReader::new(std::io::Cursor::new(&self.bytes))
            .with_guessed_format()
            .context("failed to sniff image format")?
            .into_dimensions()
            .context("failed to read image dimensions")
    }
}

impl TryFrom<String> for EncodedImage {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_data_url(&value)
    }
}

impl From<EncodedImage> for String {
    fn from(image: EncodedImage) -> Self {
        image.to_data_url()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub image: EncodedImage,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub viewed: bool,
}

impl Story {
    pub fn new(image: EncodedImage, now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("story-{}-{}", now.timestamp_millis(), &suffix[..9]),
            image,
            created_at: now,
            viewed: false,
        }
    }

    /// Age at `now`; clock skew into the future counts as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.age_at(now) >= retention
    }
}
