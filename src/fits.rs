use anyhow::{bail, Context, Result};
use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use fitsio::FitsFile;
use std::path::Path;

/// Row-major pixel plane: `data[row * width + col]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane<T> {
    pub width: usize,
    pub height: usize,
    pub data: Vec<T>,
}

impl<T: Copy> Plane<T> {
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            bail!(
                "plane of {width}x{height} needs {} pixels, got {}",
                width * height,
                data.len()
            );
        }
        Ok(Self { width, height, data })
    }

    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn get(&self, col: usize, row: usize) -> T {
        self.data[row * self.width + col]
    }

    /// Copy out `[y1:y2, x1:x2]` (half-open, zero-based).
    pub fn section(&self, x1: usize, x2: usize, y1: usize, y2: usize) -> Plane<T> {
        let x2 = x2.min(self.width);
        let y2 = y2.min(self.height);
        let width = x2.saturating_sub(x1);
        let height = y2.saturating_sub(y1);
        let mut data = Vec::with_capacity(width * height);
        for row in y1..y1 + height {
            let start = row * self.width + x1;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Plane {
            width,
            height,
            data,
        }
    }
}

/// Pixel types that can be written as a primary image.
pub trait Pixel: Copy + WriteImage {
    const IMAGE_TYPE: ImageType;
}

impl Pixel for f32 {
    const IMAGE_TYPE: ImageType = ImageType::Float;
}

impl Pixel for f64 {
    const IMAGE_TYPE: ImageType = ImageType::Double;
}

impl Pixel for i32 {
    const IMAGE_TYPE: ImageType = ImageType::Long;
}

/// Value of a header keyword written alongside an image.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// One parsed header record.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub key: String,
    pub value: String,
    /// True when the value was a quoted FITS string.
    pub quoted: bool,
}

/// Header records of a single HDU, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn from_cards(cards: Vec<Card>) -> Self {
        Self { cards }
    }

    pub fn card(&self, key: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.key == key)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.card(key).map(|c| c.value.as_str())
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(|v| v.trim().parse::<f64>().ok())
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(|v| v.trim().parse::<i64>().ok())
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Keywords to carry over when writing an image derived from this HDU.
    /// Layout keywords and logical values are left out.
    pub fn descriptive_keys(&self) -> Vec<(String, KeyValue)> {
        self.cards
            .iter()
            .filter(|c| !is_layout_key(&c.key))
            .filter_map(|c| {
                let value = if c.quoted {
                    KeyValue::Text(c.value.clone())
                } else if let Ok(v) = c.value.parse::<i64>() {
                    KeyValue::Int(v)
                } else if let Ok(v) = c.value.parse::<f64>() {
                    KeyValue::Float(v)
                } else {
                    return None;
                };
                Some((c.key.clone(), value))
            })
            .collect()
    }
}

fn is_layout_key(key: &str) -> bool {
    matches!(
        key,
        "SIMPLE" | "BITPIX" | "EXTEND" | "XTENSION" | "PCOUNT" | "GCOUNT" | "BSCALE" | "BZERO"
            | "BLANK" | "CHECKSUM" | "DATASUM"
    ) || key.starts_with("NAXIS")
}

/// Image plane loaded from the first image HDU holding data, with its header.
pub struct FitsImage<T> {
    pub plane: Plane<T>,
    pub header: Header,
}

impl<T> FitsImage<T>
where
    T: Copy,
    Vec<T>: ReadImage,
{
    /// Load the first two-dimensional image HDU that contains data from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut fits =
            FitsFile::open(path).with_context(|| format!("opening {}", path.display()))?;

        let hdu_count = fits.iter().count();
        let mut image_hdu_idx = None;
        for i in 0..hdu_count {
            let hdu = fits.hdu(i)?;
            if let HduInfo::ImageInfo { ref shape, .. } = hdu.info {
                if !shape.is_empty() && shape.iter().product::<usize>() > 0 {
                    image_hdu_idx = Some(i);
                    break;
                }
            }
        }
        let idx = image_hdu_idx
            .ok_or_else(|| anyhow::anyhow!("no image HDU found in {}", path.display()))?;
        Self::load_hdu(path, idx)
    }

    /// Load image HDU `idx` (0 = primary).
    pub fn load_hdu(path: &Path, idx: usize) -> Result<Self> {
        let mut fits =
            FitsFile::open(path).with_context(|| format!("opening {}", path.display()))?;
        let hdu = fits
            .hdu(idx)
            .with_context(|| format!("HDU {idx} of {}", path.display()))?;

        // fitsio reports the shape in row-major order: [NAXIS2, NAXIS1]
        let (width, height) = match &hdu.info {
            HduInfo::ImageInfo { shape, .. } => match shape.len() {
                2 => (shape[1], shape[0]),
                n => bail!("unsupported FITS image NAXIS={n} in {}", path.display()),
            },
            _ => bail!("HDU {idx} of {} is not an image", path.display()),
        };

        let raw: Vec<T> = hdu
            .read_image(&mut fits)
            .with_context(|| format!("reading pixels of {}", path.display()))?;
        let plane = Plane::new(width, height, raw)?;
        let header = read_header(path, idx)?;

        Ok(FitsImage { plane, header })
    }
}

/// Write `plane` as the primary image of a new file at `path`, replacing any
/// existing file, followed by `keys`.
pub fn write_image<T: Pixel>(path: &Path, plane: &Plane<T>, keys: &[(&str, KeyValue)]) -> Result<()> {
    if plane.width == 0 || plane.height == 0 {
        bail!("refusing to write empty image to {}", path.display());
    }
    let description = ImageDescription {
        data_type: T::IMAGE_TYPE,
        dimensions: &[plane.height, plane.width],
    };
    let mut fits = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .with_context(|| format!("creating {}", path.display()))?;
    let hdu = fits.primary_hdu()?;
    hdu.write_image(&mut fits, &plane.data)
        .with_context(|| format!("writing pixels to {}", path.display()))?;
    for (key, value) in keys {
        match value {
            KeyValue::Int(v) => hdu.write_key(&mut fits, key, *v)?,
            KeyValue::Float(v) => hdu.write_key(&mut fits, key, *v)?,
            KeyValue::Text(v) => hdu.write_key(&mut fits, key, v.clone())?,
        }
    }
    Ok(())
}

/// Photometric zero point `2.5 * log10(FLUXMAG0)`, or 0 when the keyword is
/// absent or not positive.
pub fn magnitude_zero_point(header: &Header) -> f64 {
    match header.float("FLUXMAG0") {
        Some(fluxmag0) if fluxmag0 > 0.0 => 2.5 * fluxmag0.log10(),
        _ => 0.0,
    }
}

/// Parse a 1-based inclusive FITS section such as `[1:120,33:80]` into
/// `(x1, x2, y1, y2)`.
pub fn parse_section(section: &str) -> Result<(usize, usize, usize, usize)> {
    let inner = section
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| anyhow::anyhow!("section {section:?} is not bracketed"))?;
    let (xs, ys) = inner
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("section {section:?} needs two axes"))?;
    let range = |axis: &str| -> Result<(usize, usize)> {
        let (lo, hi) = axis
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("axis {axis:?} in {section:?} is not a range"))?;
        Ok((lo.trim().parse()?, hi.trim().parse()?))
    };
    let (x1, x2) = range(xs)?;
    let (y1, y2) = range(ys)?;
    Ok((x1, x2, y1, y2))
}

// ---------------------------------------------------------------------------
// Header reading
// ---------------------------------------------------------------------------

const BLOCK: usize = 2880;
const RECORD: usize = 80;

/// Header of HDU `hdu_idx`, read straight from the file's 2880-byte blocks.
///
/// Works on any HDU type, including the table extensions `fitsio` will not
/// open as images. Commentary cards are skipped.
pub fn read_header(fits_path: &Path, hdu_idx: usize) -> Result<Header> {
    use std::io::{BufReader, Read, Seek, SeekFrom};

    let file = std::fs::File::open(fits_path)
        .with_context(|| format!("opening {} for header read", fits_path.display()))?;
    let mut reader = BufReader::new(file);
    let mut block = [0u8; BLOCK];

    let mut hdu = 0;
    loop {
        let mut cards = Vec::new();
        loop {
            reader
                .read_exact(&mut block)
                .with_context(|| format!("reading header block of HDU {hdu}"))?;
            if read_records(&block, &mut cards) {
                break;
            }
        }
        let header = Header::from_cards(cards);
        if hdu == hdu_idx {
            return Ok(header);
        }
        let skip = data_blocks(&header) * BLOCK as u64;
        if skip > 0 {
            reader
                .seek(SeekFrom::Current(skip as i64))
                .with_context(|| format!("seeking past data of HDU {hdu}"))?;
        }
        hdu += 1;
    }
}

/// Append the value cards of one header block; true once `END` was seen.
fn read_records(block: &[u8], cards: &mut Vec<Card>) -> bool {
    for record in block.chunks_exact(RECORD) {
        let (key, indicator, field) = (&record[..8], &record[8..10], &record[10..]);
        let Ok(key) = std::str::from_utf8(key).map(str::trim_end) else {
            continue;
        };
        match key {
            "END" => return true,
            "" | "COMMENT" | "HISTORY" | "CONTINUE" => continue,
            _ => {}
        }
        let field = String::from_utf8_lossy(field);
        let (value, quoted) = if indicator == b"= " {
            card_value(&field)
        } else {
            // non-standard card: keep the raw text after the keyword
            let rest = String::from_utf8_lossy(&record[8..]);
            (rest.trim().to_string(), false)
        };
        cards.push(Card {
            key: key.to_string(),
            value,
            quoted,
        });
    }
    false
}

/// Split a value field into its value and whether it was a string. Strings
/// lose their quotes and `''` escapes; anything after an unquoted `/` is a
/// comment.
fn card_value(field: &str) -> (String, bool) {
    let field = field.trim();
    let Some(body) = field.strip_prefix('\'') else {
        let value = field.split_once('/').map_or(field, |(value, _)| value);
        return (value.trim().to_string(), false);
    };
    let mut text = String::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                text.push('\'');
            }
            '\'' => break,
            c => text.push(c),
        }
    }
    (text.trim().to_string(), true)
}

/// Data blocks following a header: `NAXISn` times `|BITPIX|` bits plus
/// `PCOUNT` heap bytes, padded to whole blocks.
fn data_blocks(header: &Header) -> u64 {
    let naxis = header.int("NAXIS").unwrap_or(0);
    if naxis <= 0 {
        return 0;
    }
    let bits = header.int("BITPIX").unwrap_or(8).unsigned_abs();
    let elements: u64 = (1..=naxis)
        .map(|i| header.int(&format!("NAXIS{i}")).unwrap_or(0).max(0) as u64)
        .product();
    let heap = header.int("PCOUNT").unwrap_or(0).max(0) as u64;
    ((elements * bits).div_ceil(8) + heap).div_ceil(BLOCK as u64)
}
