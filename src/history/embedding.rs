//! Embedding blob codec: little-endian `f32`s, no header.

use crate::core::errors::CompanionError;

pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, CompanionError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(CompanionError::Storage(format!(
            "embedding blob has invalid length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
