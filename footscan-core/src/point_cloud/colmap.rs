//! Parsers for COLMAP's `points3D` model files.

use nalgebra::Point3;

/// One reconstructed point with its mean reprojection error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparsePoint {
    pub position: Point3<f64>,
    pub error: f64,
}

/// Parse `points3D.txt`: `ID X Y Z R G B ERROR TRACK...` per line, `#`
/// comments and blank lines ignored.
pub fn parse_points_text(text: &str) -> Result<Vec<SparsePoint>, String> {
    let mut points = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(format!(
                "line {}: expected at least 8 fields, found {}",
                number + 1,
                fields.len()
            ));
        }

        let number_at = |index: usize| {
            fields[index].parse::<f64>().map_err(|err| {
                format!("line {}: field {}: {err}", number + 1, index + 1)
            })
        };

        points.push(SparsePoint {
            position: Point3::new(number_at(1)?, number_at(2)?, number_at(3)?),
            error: number_at(7)?,
        });
    }
    Ok(points)
}

/// Parse little-endian `points3D.bin`.
pub fn parse_points_bin(bytes: &[u8]) -> Result<Vec<SparsePoint>, String> {
    let mut reader = Reader { bytes, offset: 0 };
    let count = reader.u64()?;

    // Each record is at least 43 bytes; reject counts the file can't hold.
    let max_possible = (bytes.len() / 43) as u64;
    if count > max_possible {
        return Err(format!(
            "header claims {count} points but file holds at most {max_possible}"
        ));
    }

    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let _id = reader.u64()?;
        let position = Point3::new(reader.f64()?, reader.f64()?, reader.f64()?);
        reader.skip(3)?;
        let error = reader.f64()?;
        let track_len = reader.u64()?;
        let track_bytes = track_len
            .checked_mul(8)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| format!("track length {track_len} overflows"))?;
        reader.skip(track_bytes)?;
        points.push(SparsePoint { position, error });
    }

    if reader.offset != bytes.len() {
        return Err(format!(
            "{} trailing bytes after {count} points",
            bytes.len() - reader.offset
        ));
    }
    Ok(points)
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let end = self
            .offset
            .checked_add(N)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format!("truncated at byte {}", self.offset))?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..end]);
        self.offset = end;
        Ok(out)
    }

    fn skip(&mut self, len: usize) -> Result<(), String> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format!("truncated at byte {}", self.offset))?;
        self.offset = end;
        Ok(())
    }

    fn u64(&mut self) -> Result<u64, String> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn f64(&mut self) -> Result<f64, String> {
        self.take::<8>().map(f64::from_le_bytes)
    }
}
