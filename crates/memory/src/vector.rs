//! Vector math and the in-process search index.
//!
//! - Little-endian f32 blob encoding used by the `memories.embedding` column
//! - [`QuantizedIndex`]: scalar-quantized (int8) cosine index rebuilt from the table

use std::cmp::Ordering;

pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a stored blob. Trailing bytes that do not fill an f32 are ignored.
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// One quantized vector. Scale is irrelevant for cosine, so only the
/// integer components and their norm are kept.
#[derive(Debug, Clone)]
struct QuantizedVector {
    id: String,
    values: Vec<i8>,
    norm: f64,
}

fn quantize(vector: &[f32]) -> (Vec<i8>, f64) {
    let max_abs = vector.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max_abs <= f32::EPSILON {
        return (vec![0; vector.len()], 0.0);
    }
    let scale = 127.0 / max_abs;
    let values: Vec<i8> = vector
        .iter()
        .map(|v| (v * scale).round().clamp(-127.0, 127.0) as i8)
        .collect();
    let norm = values
        .iter()
        .map(|v| (*v as i64 * *v as i64) as f64)
        .sum::<f64>()
        .sqrt();
    (values, norm)
}

/// A search hit: record id and cosine distance (`1 - similarity`).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub distance: f32,
}

/// Int8 cosine index over every stored embedding of one dimension.
#[derive(Debug, Default)]
pub struct QuantizedIndex {
    dimensions: usize,
    entries: Vec<QuantizedVector>,
}

impl QuantizedIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: Vec::new(),
        }
    }

    /// Build from `(id, embedding)` pairs. Vectors of the wrong width are skipped.
    pub fn build<I>(dimensions: usize, rows: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut index = Self::new(dimensions);
        for (id, vector) in rows {
            if vector.len() != dimensions {
                continue;
            }
            let (values, norm) = quantize(&vector);
            index.entries.push(QuantizedVector { id, values, norm });
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `limit` nearest entries by ascending cosine distance.
    pub fn nearest(&self, query: &[f32], limit: usize) -> Vec<IndexHit> {
        if limit == 0 || query.len() != self.dimensions {
            return Vec::new();
        }
        let (q, q_norm) = quantize(query);

        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .map(|entry| {
                let denom = entry.norm * q_norm;
                let similarity = if denom < 1e-10 {
                    0.0
                } else {
                    let dot: i64 = entry
                        .values
                        .iter()
                        .zip(q.iter())
                        .map(|(a, b)| *a as i64 * *b as i64)
                        .sum();
                    dot as f64 / denom
                };
                IndexHit {
                    id: entry.id.clone(),
                    distance: (1.0 - similarity) as f32,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_encoding_is_little_endian() {
        let blob = encode_embedding(&[1.0, -0.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_embedding(&blob), vec![1.0, -0.5]);
    }

    #[test]
    fn quantized_distance_tracks_float_cosine() {
        let a = vec![0.12, -0.5, 0.33, 0.9];
        let b = vec![0.1, -0.4, 0.35, 0.7];
        let index = QuantizedIndex::build(4, vec![("a".to_string(), a.clone())]);
        let hit = &index.nearest(&b, 1)[0];
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
        let exact = 1.0 - dot / (norm(&a) * norm(&b));
        assert!((hit.distance - exact).abs() < 0.01);
    }

    #[test]
    fn nearest_orders_ascending_and_limits() {
        let index = QuantizedIndex::build(
            3,
            vec![
                ("ortho".to_string(), vec![0.0, 1.0, 0.0]),
                ("same".to_string(), vec![1.0, 0.0, 0.0]),
                ("half".to_string(), vec![0.5, 0.5, 0.0]),
                ("opposite".to_string(), vec![-1.0, 0.0, 0.0]),
            ],
        );
        let hits = index.nearest(&[1.0, 0.0, 0.0], 3);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["same", "half", "ortho"]);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[2].distance - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn wrong_width_vectors_are_skipped() {
        let index = QuantizedIndex::build(
            2,
            vec![
                ("ok".to_string(), vec![1.0, 0.0]),
                ("bad".to_string(), vec![1.0, 0.0, 0.0]),
            ],
        );
        assert_eq!(index.len(), 1);
        assert!(index.nearest(&[1.0, 0.0, 0.0], 5).is_empty());
        assert!(index.nearest(&[1.0, 0.0], 0).is_empty());

        let zero = QuantizedIndex::build(2, vec![("zero".to_string(), vec![0.0, 0.0])]);
        assert_eq!(zero.nearest(&[1.0, 0.0], 1)[0].distance, 1.0);
    }
}
