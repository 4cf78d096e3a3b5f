use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::{ChunkProgress, Progress, ProgressCallback};

pin_project! {
    /// 统计已发送字节数的请求体流，每读出一块回调一次百分比
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        bytes_sent: u64,
        total_bytes: u64,
        callback: Option<ProgressCallback>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, total_bytes: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            total_bytes,
            callback,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;

                    if let Some(callback) = this.callback {
                        callback(Progress::Percentage {
                            value: percentage(*this.bytes_sent, *this.total_bytes),
                        });
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Splits an in-memory payload into pieces of `piece_size` without copying.
pub fn byte_pieces(data: Bytes, piece_size: usize) -> impl Stream<Item = std::io::Result<Bytes>> {
    let piece_size = piece_size.max(1);
    let len = data.len();
    let pieces: Vec<std::io::Result<Bytes>> = (0..len)
        .step_by(piece_size)
        .map(|start| Ok(data.slice(start..(start + piece_size).min(len))))
        .collect();

    futures::stream::iter(pieces)
}

fn percentage(done: u64, total: u64) -> f64 {
    if total > 0 {
        (done as f64 / total as f64 * 100.0).min(100.0)
    } else {
        0.0
    }
}

/// 分片进度跟踪器：服务端回执的计数只增不减，且不超过总分片数
#[derive(Debug, Clone)]
pub struct ChunkCounter {
    uploaded: u64,
    total: u64,
}

impl ChunkCounter {
    pub fn new(total: u64) -> Self {
        Self { uploaded: 0, total }
    }

    pub fn record(&mut self, reported: u64) -> ChunkProgress {
        self.uploaded = reported.max(self.uploaded).min(self.total);
        ChunkProgress::new(self.uploaded, self.total)
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["KB", "MB", "GB"];
    const UNIT_SIZE: f64 = 1024.0;

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / UNIT_SIZE;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
