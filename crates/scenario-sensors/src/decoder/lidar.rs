//! Lidar payload decoding (PCD point cloud files) and bird's-eye-view rendering
//!
//! Supports the `ascii` and `binary` data layouts of the PCD format. The
//! `binary_compressed` layout is rejected. Fields `x`, `y` and `z` are required,
//! `intensity` is read when present and every other field is skipped.

use image::{GrayImage, Luma};

use crate::config::defaults::{DEFAULT_BEV_EXTENT_M, DEFAULT_BEV_RESOLUTION_M, MAX_BEV_SIZE_PX};
use crate::errors::{DecodeError, SensorError, SensorResult};
use crate::models::ChannelKind;

/// One lidar return in the ego frame (metres)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LidarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

/// Decoded lidar sweep
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPointCloud {
    points: Vec<LidarPoint>,
    has_intensity: bool,
}

/// Rasterisation parameters for [`DecodedPointCloud::render_bev`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BevRenderOptions {
    resolution: f32,
    extent: f32,
}

impl BevRenderOptions {
    /// `resolution` is metres per pixel, `extent` the side of the square
    /// rendered area in metres, centred on the ego origin.
    pub fn new(resolution: f32, extent: f32) -> SensorResult<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(SensorError::configuration(format!(
                "render resolution must be positive, got {resolution}"
            )));
        }
        if !(extent.is_finite() && extent >= resolution) {
            return Err(SensorError::configuration(format!(
                "render extent must be at least one pixel wide, got {extent}m at {resolution}m/px"
            )));
        }
        let side = (extent / resolution).ceil();
        if side > MAX_BEV_SIZE_PX as f32 {
            return Err(SensorError::configuration(format!(
                "render of {extent}m at {resolution}m/px needs {side}px per side, limit is {MAX_BEV_SIZE_PX}"
            )));
        }
        Ok(Self { resolution, extent })
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn extent(&self) -> f32 {
        self.extent
    }

    /// Output image side length in pixels
    pub fn size_px(&self) -> u32 {
        (self.extent / self.resolution).ceil() as u32
    }
}

impl Default for BevRenderOptions {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_BEV_RESOLUTION_M,
            extent: DEFAULT_BEV_EXTENT_M,
        }
    }
}

impl DecodedPointCloud {
    pub fn from_points(points: Vec<LidarPoint>) -> Self {
        Self {
            points,
            has_intensity: false,
        }
    }

    pub fn points(&self) -> &[LidarPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the source file carried an `intensity` field
    pub fn has_intensity(&self) -> bool {
        self.has_intensity
    }

    /// Top-down occupancy image
    ///
    /// +x (forward) points up and +y (left) points left. Each pixel holds the
    /// maximum height of the points falling into its cell, scaled so the
    /// lowest rendered point maps to 1 and the highest to 255; empty cells
    /// are 0. Points outside the extent or with non-finite coordinates are
    /// skipped.
    pub fn render_bev(&self, options: &BevRenderOptions) -> GrayImage {
        let size = options.size_px();
        let half = options.extent / 2.0;
        let mut image = GrayImage::new(size, size);

        let cell = |point: &LidarPoint| -> Option<(u32, u32)> {
            if !(point.x.is_finite() && point.y.is_finite() && point.z.is_finite()) {
                return None;
            }
            let col = ((half - point.y) / options.resolution).floor();
            let row = ((half - point.x) / options.resolution).floor();
            if col < 0.0 || row < 0.0 || col >= size as f32 || row >= size as f32 {
                return None;
            }
            Some((col as u32, row as u32))
        };

        let (min_z, max_z) = self
            .points
            .iter()
            .filter(|p| cell(*p).is_some())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.z), hi.max(p.z))
            });
        if min_z > max_z {
            return image;
        }
        let span = max_z - min_z;

        for point in &self.points {
            let Some((col, row)) = cell(point) else {
                continue;
            };
            let normalized = if span > 0.0 {
                (point.z - min_z) / span
            } else {
                1.0
            };
            let value = 1 + (normalized * 254.0).round() as u8;
            let pixel = image.get_pixel_mut(col, row);
            if value > pixel.0[0] {
                *pixel = Luma([value]);
            }
        }

        image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataLayout {
    Ascii,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    F32,
    F64,
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
}

impl ScalarType {
    fn from_header(ty: &str, size: usize) -> Option<Self> {
        match (ty, size) {
            ("F", 4) => Some(Self::F32),
            ("F", 8) => Some(Self::F64),
            ("I", 1) => Some(Self::I8),
            ("I", 2) => Some(Self::I16),
            ("I", 4) => Some(Self::I32),
            ("U", 1) => Some(Self::U8),
            ("U", 2) => Some(Self::U16),
            ("U", 4) => Some(Self::U32),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 => 8,
        }
    }

    /// Little-endian read; `raw` is exactly `self.size()` bytes
    fn read_le(self, raw: &[u8]) -> Option<f64> {
        Some(match self {
            Self::F32 => f32::from_le_bytes(raw.try_into().ok()?) as f64,
            Self::F64 => f64::from_le_bytes(raw.try_into().ok()?),
            Self::I8 => i8::from_le_bytes(raw.try_into().ok()?) as f64,
            Self::I16 => i16::from_le_bytes(raw.try_into().ok()?) as f64,
            Self::I32 => i32::from_le_bytes(raw.try_into().ok()?) as f64,
            Self::U8 => raw.first().copied()? as f64,
            Self::U16 => u16::from_le_bytes(raw.try_into().ok()?) as f64,
            Self::U32 => u32::from_le_bytes(raw.try_into().ok()?) as f64,
        })
    }
}

#[derive(Debug)]
struct Field {
    name: String,
    scalar: ScalarType,
    /// Byte offset within one binary record
    byte_offset: usize,
    /// Token offset within one ascii line
    value_offset: usize,
}

#[derive(Debug)]
struct PcdHeader {
    fields: Vec<Field>,
    points: usize,
    layout: DataLayout,
    record_size: usize,
    values_per_point: usize,
}

impl PcdHeader {
    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
}

impl<'a> Parser<'a> {
    fn fail(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::new(ChannelKind::Lidar, self.bytes.len(), reason)
    }

    /// Parses the header and returns it with the byte offset where the data section begins
    fn header(&self) -> Result<(PcdHeader, usize), DecodeError> {
        let mut names: Option<Vec<String>> = None;
        let mut sizes: Option<Vec<usize>> = None;
        let mut types: Option<Vec<String>> = None;
        let mut counts: Option<Vec<usize>> = None;
        let mut width: Option<usize> = None;
        let mut height: Option<usize> = None;
        let mut points: Option<usize> = None;

        let mut cursor = 0;
        while cursor < self.bytes.len() {
            let line_end = self.bytes[cursor..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|p| cursor + p)
                .unwrap_or(self.bytes.len());
            let line = std::str::from_utf8(&self.bytes[cursor..line_end])
                .map_err(|_| self.fail("header contains non UTF-8 text"))?
                .trim();
            cursor = (line_end + 1).min(self.bytes.len());

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap_or_default().to_ascii_uppercase();
            let values: Vec<&str> = parts.collect();

            match key.as_str() {
                "VERSION" | "VIEWPOINT" => {}
                "FIELDS" => names = Some(values.iter().map(|v| v.to_string()).collect()),
                "SIZE" => sizes = Some(self.numbers(&key, &values)?),
                "TYPE" => types = Some(values.iter().map(|v| v.to_ascii_uppercase()).collect()),
                "COUNT" => counts = Some(self.numbers(&key, &values)?),
                "WIDTH" => width = Some(self.single_number(&key, &values)?),
                "HEIGHT" => height = Some(self.single_number(&key, &values)?),
                "POINTS" => points = Some(self.single_number(&key, &values)?),
                "DATA" => {
                    let layout = match values.first().map(|v| v.to_ascii_lowercase()) {
                        Some(ref v) if v == "ascii" => DataLayout::Ascii,
                        Some(ref v) if v == "binary" => DataLayout::Binary,
                        Some(ref v) if v == "binary_compressed" => {
                            return Err(self.fail("binary_compressed PCD data is not supported"));
                        }
                        other => {
                            return Err(self.fail(format!(
                                "unknown PCD data layout {:?}",
                                other.unwrap_or_default()
                            )));
                        }
                    };

                    let names = names.ok_or_else(|| self.fail("PCD header is missing FIELDS"))?;
                    let sizes = sizes.ok_or_else(|| self.fail("PCD header is missing SIZE"))?;
                    let types = types.ok_or_else(|| self.fail("PCD header is missing TYPE"))?;
                    let counts = counts.unwrap_or_else(|| vec![1; names.len()]);
                    if sizes.len() != names.len()
                        || types.len() != names.len()
                        || counts.len() != names.len()
                    {
                        return Err(self.fail(
                            "PCD header FIELDS, SIZE, TYPE and COUNT lengths differ",
                        ));
                    }

                    let mut fields = Vec::with_capacity(names.len());
                    let mut byte_offset = 0;
                    let mut value_offset = 0;
                    for (((name, size), ty), count) in
                        names.into_iter().zip(sizes).zip(types).zip(counts)
                    {
                        let scalar = ScalarType::from_header(&ty, size).ok_or_else(|| {
                            self.fail(format!("unsupported type {ty}{size} for field '{name}'"))
                        })?;
                        if count == 0 {
                            return Err(self.fail(format!("field '{name}' has COUNT 0")));
                        }
                        fields.push(Field {
                            name,
                            scalar,
                            byte_offset,
                            value_offset,
                        });
                        byte_offset = scalar
                            .size()
                            .checked_mul(count)
                            .and_then(|bytes| byte_offset.checked_add(bytes))
                            .ok_or_else(|| self.fail("PCD record size overflows"))?;
                        value_offset = value_offset
                            .checked_add(count)
                            .ok_or_else(|| self.fail("PCD values per point overflow"))?;
                    }

                    let points = match (points, width, height) {
                        (Some(points), _, _) => points,
                        (None, Some(w), Some(h)) => w
                            .checked_mul(h)
                            .ok_or_else(|| self.fail("PCD WIDTH x HEIGHT overflows"))?,
                        (None, Some(w), None) => w,
                        _ => return Err(self.fail("PCD header is missing POINTS and WIDTH")),
                    };

                    let header = PcdHeader {
                        fields,
                        points,
                        layout,
                        record_size: byte_offset,
                        values_per_point: value_offset,
                    };
                    for required in ["x", "y", "z"] {
                        if header.field(required).is_none() {
                            return Err(self.fail(format!("PCD is missing required field '{required}'")));
                        }
                    }
                    return Ok((header, cursor));
                }
                other => {
                    return Err(self.fail(format!("unexpected PCD header line '{other}'")));
                }
            }
        }

        Err(self.fail("PCD header has no DATA line"))
    }

    fn numbers(&self, key: &str, values: &[&str]) -> Result<Vec<usize>, DecodeError> {
        values
            .iter()
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|_| self.fail(format!("invalid {key} value '{v}'")))
            })
            .collect()
    }

    fn single_number(&self, key: &str, values: &[&str]) -> Result<usize, DecodeError> {
        match values {
            [value] => value
                .parse::<usize>()
                .map_err(|_| self.fail(format!("invalid {key} value '{value}'"))),
            _ => Err(self.fail(format!("{key} expects exactly one value"))),
        }
    }

    fn binary_points(&self, header: &PcdHeader, data: &[u8]) -> Result<Vec<[f64; 4]>, DecodeError> {
        let expected = header
            .record_size
            .checked_mul(header.points)
            .ok_or_else(|| self.fail("PCD point count overflows"))?;
        if data.len() < expected {
            return Err(self.fail(format!(
                "binary data holds {} bytes, {} points need {expected}",
                data.len(),
                header.points
            )));
        }

        let read = |record: &[u8], field: &Field| {
            let start = field.byte_offset;
            field
                .scalar
                .read_le(&record[start..start + field.scalar.size()])
        };

        data[..expected]
            .chunks_exact(header.record_size)
            .map(|record| self.extract(header, |field| read(record, field)))
            .collect()
    }

    fn ascii_points(&self, header: &PcdHeader, data: &[u8]) -> Result<Vec<[f64; 4]>, DecodeError> {
        let text = std::str::from_utf8(data).map_err(|_| self.fail("ascii data is not UTF-8"))?;
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.len() < header.points {
            return Err(self.fail(format!(
                "ascii data holds {} rows, header declares {} points",
                lines.len(),
                header.points
            )));
        }

        lines[..header.points]
            .iter()
            .enumerate()
            .map(|(row, line)| {
                let values: Vec<&str> = line.split_whitespace().collect();
                if values.len() != header.values_per_point {
                    return Err(self.fail(format!(
                        "row {row} has {} values, expected {}",
                        values.len(),
                        header.values_per_point
                    )));
                }
                self.extract(header, |field| {
                    values.get(field.value_offset)?.parse::<f64>().ok()
                })
            })
            .collect()
    }

    fn extract<F>(&self, header: &PcdHeader, mut read: F) -> Result<[f64; 4], DecodeError>
    where
        F: FnMut(&Field) -> Option<f64>,
    {
        let mut out = [0.0; 4];
        for (slot, name) in ["x", "y", "z", "intensity"].into_iter().enumerate() {
            let Some(field) = header.field(name) else {
                continue;
            };
            out[slot] = read(field)
                .ok_or_else(|| self.fail(format!("invalid value for field '{name}'")))?;
        }
        Ok(out)
    }
}

pub(crate) fn decode_lidar(bytes: &[u8]) -> Result<DecodedPointCloud, DecodeError> {
    let parser = Parser { bytes };
    let (header, data_start) = parser.header()?;
    let data = &bytes[data_start..];

    let raw = match header.layout {
        DataLayout::Binary => parser.binary_points(&header, data)?,
        DataLayout::Ascii => parser.ascii_points(&header, data)?,
    };

    let points = raw
        .into_iter()
        .map(|[x, y, z, intensity]| LidarPoint {
            x: x as f32,
            y: y as f32,
            z: z as f32,
            intensity: intensity as f32,
        })
        .collect();

    Ok(DecodedPointCloud {
        points,
        has_intensity: header.field("intensity").is_some(),
    })
}
