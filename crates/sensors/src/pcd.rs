//! Binary PCD (Point Cloud Data) encoding, fields `x y z` plus an optional
//! packed `rgb` field, little-endian `float32` throughout (spec §6).

use crate::error::SensorError;
use types::{ColoredPoint, Rgba};

const HEADER_VERSION: &str = "# .PCD v0.7 - Point Cloud Data file format\nVERSION 0.7\n";

/// Pack an RGBA color into the single-float `rgb` convention used by PCL:
/// the low 24 bits of a `u32` hold `0x00RRGGBB`, reinterpreted as `f32` bits.
fn pack_rgb(c: Rgba) -> f32 {
    let packed = ((c.r as u32) << 16) | ((c.g as u32) << 8) | (c.b as u32);
    f32::from_bits(packed)
}

fn unpack_rgb(v: f32) -> Rgba {
    let packed = v.to_bits();
    Rgba {
        r: ((packed >> 16) & 0xFF) as u8,
        g: ((packed >> 8) & 0xFF) as u8,
        b: (packed & 0xFF) as u8,
        a: 255,
    }
}

/// Encode a point cloud as binary PCD.
///
/// If any point carries a color, every point gets an `rgb` field (points
/// without a color encode as black, per the Open Question in DESIGN.md:
/// colors are accepted unconditionally rather than rejecting the mix).
pub fn encode(points: &[ColoredPoint]) -> Vec<u8> {
    let has_color = points.iter().any(|p| p.rgba.is_some());
    let n = points.len();

    let mut header = String::new();
    header.push_str(HEADER_VERSION);
    if has_color {
        header.push_str("FIELDS x y z rgb\n");
        header.push_str("SIZE 4 4 4 4\n");
        header.push_str("TYPE F F F F\n");
        header.push_str("COUNT 1 1 1 1\n");
    } else {
        header.push_str("FIELDS x y z\n");
        header.push_str("SIZE 4 4 4\n");
        header.push_str("TYPE F F F\n");
        header.push_str("COUNT 1 1 1\n");
    }
    header.push_str(&format!("WIDTH {n}\n"));
    header.push_str("HEIGHT 1\n");
    header.push_str("VIEWPOINT 0 0 0 1 0 0 0\n");
    header.push_str(&format!("POINTS {n}\n"));
    header.push_str("DATA binary\n");

    let floats_per_point = if has_color { 4 } else { 3 };
    let mut out = Vec::with_capacity(header.len() + n * floats_per_point * 4);
    out.extend_from_slice(header.as_bytes());

    for p in points {
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&p.z.to_le_bytes());
        if has_color {
            let rgb = pack_rgb(p.rgba.unwrap_or_default());
            out.extend_from_slice(&rgb.to_le_bytes());
        }
    }

    out
}

/// Decode binary PCD produced by [`encode`] (or any conforming binary PCD
/// with `x y z` and an optional `rgb` field).
pub fn decode(bytes: &[u8]) -> Result<Vec<ColoredPoint>, SensorError> {
    let header_end = find_data_binary(bytes)
        .ok_or_else(|| SensorError::Encode("missing DATA binary header line".into()))?;
    let header = std::str::from_utf8(&bytes[..header_end])
        .map_err(|e| SensorError::Encode(format!("non-utf8 header: {e}")))?;

    let mut fields: Vec<String> = Vec::new();
    let mut points = 0usize;
    for line in header.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("FIELDS ") {
            fields = rest.split_whitespace().map(str::to_string).collect();
        } else if let Some(rest) = line.strip_prefix("POINTS ") {
            points = rest
                .trim()
                .parse()
                .map_err(|_| SensorError::Encode(format!("bad POINTS value: {rest}")))?;
        }
    }

    let has_rgb = fields.iter().any(|f| f == "rgb");
    let floats_per_point = if has_rgb { 4 } else { 3 };
    let payload = &bytes[header_end..];
    let expected = points * floats_per_point * 4;
    if payload.len() < expected {
        return Err(SensorError::Encode(format!(
            "payload too short: expected {expected} bytes, got {}",
            payload.len()
        )));
    }

    let mut out = Vec::with_capacity(points);
    let mut offset = 0;
    for _ in 0..points {
        let x = read_f32(payload, &mut offset);
        let y = read_f32(payload, &mut offset);
        let z = read_f32(payload, &mut offset);
        let rgba = if has_rgb {
            Some(unpack_rgb(read_f32(payload, &mut offset)))
        } else {
            None
        };
        out.push(ColoredPoint { x, y, z, rgba });
    }

    Ok(out)
}

fn read_f32(buf: &[u8], offset: &mut usize) -> f32 {
    let bytes: [u8; 4] = buf[*offset..*offset + 4].try_into().unwrap();
    *offset += 4;
    f32::from_le_bytes(bytes)
}

fn find_data_binary(bytes: &[u8]) -> Option<usize> {
    const NEEDLE: &[u8] = b"DATA binary\n";
    bytes
        .windows(NEEDLE.len())
        .position(|w| w == NEEDLE)
        .map(|p| p + NEEDLE.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cloud_roundtrip() {
        let bytes = encode(&[]);
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_xyz_only_roundtrip() {
        let points = vec![
            ColoredPoint { x: 1.0, y: 2.0, z: 3.0, rgba: None },
            ColoredPoint { x: -1.5, y: 0.0, z: 4.25, rgba: None },
        ];
        let bytes = encode(&points);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].x, 1.0);
        assert_eq!(decoded[1].z, 4.25);
        assert!(decoded[0].rgba.is_none());
    }

    #[test]
    fn test_colored_roundtrip() {
        let points = vec![ColoredPoint { x: 1.0, y: 2.0, z: 3.0, rgba: Some(Rgba::RED) }];
        let bytes = encode(&points);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded[0].rgba, Some(Rgba::RED));
    }

    #[test]
    fn test_mixed_color_defaults_to_black() {
        let points = vec![
            ColoredPoint { x: 1.0, y: 1.0, z: 1.0, rgba: Some(Rgba::RED) },
            ColoredPoint { x: 2.0, y: 2.0, z: 2.0, rgba: None },
        ];
        let bytes = encode(&points);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded[1].rgba, Some(Rgba { r: 0, g: 0, b: 0, a: 255 }));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let mut bytes = encode(&[ColoredPoint { x: 1.0, y: 1.0, z: 1.0, rgba: None }]);
        bytes.truncate(bytes.len() - 2);
        assert!(decode(&bytes).is_err());
    }
}
