//! 上传策略与分片规划
//!
//! - 文件 <= 100MB：单次上传
//! - 文件 > 100MB：按固定 5MB 分片，分片编号从 1 开始

use std::ops::Range;
use super::types::{UploadStrategy, MAX_REGULAR_UPLOAD};

/// 根据文件大小选择上传策略
pub fn classify(file_size: u64) -> UploadStrategy {
    if file_size <= MAX_REGULAR_UPLOAD {
        UploadStrategy::Single
    } else {
        UploadStrategy::Chunked
    }
}

/// 计算分片数量
pub fn plan(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// 第 `part_number` 个分片（从 1 开始）的字节范围
pub fn chunk_range(part_number: u64, file_size: u64, chunk_size: u64) -> Range<u64> {
    let start = part_number.saturating_sub(1).saturating_mul(chunk_size).min(file_size);
    let end = part_number.saturating_mul(chunk_size).min(file_size);
    start..end
}

/// Iterates `(part_number, range)` over a file in order.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
    next_part: u64,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        Self {
            file_size,
            chunk_size,
            total_chunks: plan(file_size, chunk_size),
            next_part: 1,
        }
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }
}

impl Iterator for ChunkPlan {
    type Item = (u64, Range<u64>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_part > self.total_chunks {
            return None;
        }

        let part = self.next_part;
        self.next_part += 1;
        Some((part, chunk_range(part, self.file_size, self.chunk_size)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_chunks + 1).saturating_sub(self.next_part) as usize;
        (remaining, Some(remaining))
    }
}
