//! Delivery of analyzed payloads to disk, immediate or two-phase
//!
//! `ImmediateSink` writes each payload as soon as it validates. `BufferedSink`
//! implements the two-phase mode: payloads are held during the download phase
//! (in memory up to a cap, then spilled to the temp store) and only written to
//! their final locations in `finish`. Both sinks route every write through
//! `file_manager::save_image`, so statistics behave identically in either mode.

use crate::config::{AnalysisConfig, FormatConfig};
use crate::error::Result;
use crate::file_manager::{self, ImageInfoList};
use crate::stats::StatsHandle;
use crate::temp_store::{TempFileStore, TempHandle};
use crate::types::AnalysisMetadata;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// One validated payload ready for delivery
#[derive(Clone, Debug)]
pub struct SaveItem {
    /// Raw image bytes
    pub buffer: Vec<u8>,
    /// Target path, before collision renaming
    pub path: PathBuf,
    /// Source URL, for logging and failure bookkeeping
    pub url: String,
    /// Analyzer metadata when the payload was analyzed
    pub analysis: Option<AnalysisMetadata>,
}

/// Destination for validated payloads
#[async_trait]
pub trait SaveSink: Send + Sync {
    /// Accept one payload
    async fn deliver(&self, item: SaveItem, stats: &StatsHandle) -> Result<()>;

    /// Flush anything still held; called once after the queue drains
    async fn finish(&self, stats: &StatsHandle) -> Result<()>;
}

/// Writes each payload to its final location as it arrives
pub struct ImmediateSink {
    format: FormatConfig,
    info_list: Option<ImageInfoList>,
}

impl ImmediateSink {
    /// Create a sink writing with the given conversion settings
    pub fn new(format: FormatConfig, info_list: Option<ImageInfoList>) -> Self {
        Self { format, info_list }
    }
}

#[async_trait]
impl SaveSink for ImmediateSink {
    async fn deliver(&self, item: SaveItem, stats: &StatsHandle) -> Result<()> {
        file_manager::save_image(
            item.buffer,
            &item.path,
            &item.url,
            stats,
            &self.format,
            item.analysis.as_ref(),
            self.info_list.as_ref(),
        )
        .await
    }

    async fn finish(&self, _stats: &StatsHandle) -> Result<()> {
        Ok(())
    }
}

/// Where a held payload currently lives
enum HeldBuffer {
    Memory(Vec<u8>),
    Spilled(TempHandle),
}

struct HeldItem {
    buffer: HeldBuffer,
    path: PathBuf,
    url: String,
    analysis: Option<AnalysisMetadata>,
}

/// Holds payloads until `finish`, spilling to the temp store beyond a cap
pub struct BufferedSink {
    format: FormatConfig,
    store: TempFileStore,
    max_hold_buffers: usize,
    cleanup_on_complete: bool,
    held: Mutex<Vec<HeldItem>>,
    info_list: Option<ImageInfoList>,
}

impl BufferedSink {
    /// Create a two-phase sink, optionally clearing stale temp files first
    pub async fn new(
        analysis: &AnalysisConfig,
        format: FormatConfig,
        info_list: Option<ImageInfoList>,
    ) -> Result<Self> {
        let store = TempFileStore::new(&analysis.temp_dir);
        if analysis.cleanup_temp_on_start {
            store.clear().await?;
        }
        Ok(Self {
            format,
            store,
            max_hold_buffers: analysis.max_hold_buffers.max(1),
            cleanup_on_complete: analysis.cleanup_temp_on_complete,
            held: Mutex::new(Vec::new()),
            info_list,
        })
    }

    /// Number of payloads currently held, spilled included
    pub async fn held_count(&self) -> usize {
        self.held.lock().await.len()
    }
}

#[async_trait]
impl SaveSink for BufferedSink {
    async fn deliver(&self, item: SaveItem, _stats: &StatsHandle) -> Result<()> {
        let mut held = self.held.lock().await;
        let in_memory = held
            .iter()
            .filter(|h| matches!(h.buffer, HeldBuffer::Memory(_)))
            .count();
        let buffer = if in_memory >= self.max_hold_buffers {
            let handle = self.store.write("hold", &item.url, &item.buffer).await?;
            tracing::debug!(url = %item.url, "hold cap reached, payload spilled to temp store");
            HeldBuffer::Spilled(handle)
        } else {
            HeldBuffer::Memory(item.buffer)
        };
        held.push(HeldItem {
            buffer,
            path: item.path,
            url: item.url,
            analysis: item.analysis,
        });
        Ok(())
    }

    async fn finish(&self, stats: &StatsHandle) -> Result<()> {
        let drained: Vec<HeldItem> = {
            let mut held = self.held.lock().await;
            held.drain(..).collect()
        };
        tracing::info!(count = drained.len(), "writing held payloads to final locations");

        for item in drained {
            let buffer = match item.buffer {
                HeldBuffer::Memory(buffer) => buffer,
                HeldBuffer::Spilled(handle) => match self.store.read(&handle).await {
                    Ok(buffer) => buffer,
                    Err(error) => {
                        tracing::warn!(url = %item.url, error = %error, "spilled payload unreadable");
                        stats.record_failure(&item.url);
                        continue;
                    }
                },
            };
            file_manager::save_image(
                buffer,
                &item.path,
                &item.url,
                stats,
                &self.format,
                item.analysis.as_ref(),
                self.info_list.as_ref(),
            )
            .await?;
        }

        if self.cleanup_on_complete {
            self.store.clear().await?;
        }
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tempfile::TempDir;

    const PNG_1X1_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

    fn png_1x1() -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(PNG_1X1_B64)
            .unwrap()
    }

    fn item(path: PathBuf, url: &str) -> SaveItem {
        SaveItem {
            buffer: png_1x1(),
            path,
            url: url.to_string(),
            analysis: None,
        }
    }

    fn buffered_config(temp_dir: &std::path::Path, max_hold: usize) -> AnalysisConfig {
        AnalysisConfig {
            temp_dir: temp_dir.to_path_buf(),
            max_hold_buffers: max_hold,
            ..AnalysisConfig::default()
        }
    }

    #[tokio::test]
    async fn immediate_sink_writes_on_deliver() {
        let dir = TempDir::new().unwrap();
        let stats = StatsHandle::new(1);
        let sink = ImmediateSink::new(FormatConfig::default(), None);
        let path = dir.path().join("a.png");

        sink.deliver(item(path.clone(), "https://example.com/a.png"), &stats)
            .await
            .unwrap();
        assert!(path.exists());
        sink.finish(&stats).await.unwrap();
        assert_eq!(stats.snapshot().successful, 1);
    }

    #[tokio::test]
    async fn buffered_sink_defers_writes_until_finish() {
        let dir = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let stats = StatsHandle::new(2);
        let sink = BufferedSink::new(
            &buffered_config(temp.path(), 8),
            FormatConfig::default(),
            None,
        )
        .await
        .unwrap();

        for name in ["a.png", "b.png"] {
            let path = dir.path().join(name);
            sink.deliver(item(path.clone(), &format!("https://example.com/{name}")), &stats)
                .await
                .unwrap();
            assert!(!path.exists(), "nothing lands before finish");
        }
        assert_eq!(sink.held_count().await, 2);
        assert_eq!(stats.snapshot().successful, 0);

        sink.finish(&stats).await.unwrap();
        assert!(dir.path().join("a.png").exists());
        assert!(dir.path().join("b.png").exists());
        assert_eq!(stats.snapshot().successful, 2);
        assert_eq!(sink.held_count().await, 0);
    }

    #[tokio::test]
    async fn overflow_spills_to_temp_store_and_still_delivers() {
        let dir = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let stats = StatsHandle::new(3);
        let sink = BufferedSink::new(
            &buffered_config(temp.path(), 1),
            FormatConfig::default(),
            None,
        )
        .await
        .unwrap();

        for name in ["a.png", "b.png", "c.png"] {
            sink.deliver(
                item(dir.path().join(name), &format!("https://example.com/{name}")),
                &stats,
            )
            .await
            .unwrap();
        }
        // Cap of one means two payloads were spilled
        let spilled = std::fs::read_dir(temp.path().join("hold"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(spilled, 2);

        sink.finish(&stats).await.unwrap();
        assert_eq!(stats.snapshot().successful, 3);
        for name in ["a.png", "b.png", "c.png"] {
            assert!(dir.path().join(name).exists());
        }
    }

    #[tokio::test]
    async fn finish_clears_temp_store_when_configured() {
        let dir = TempDir::new().unwrap();
        let temp_root = TempDir::new().unwrap();
        let temp = temp_root.path().join("hold");
        let stats = StatsHandle::new(1);
        let sink = BufferedSink::new(
            &buffered_config(&temp, 0),
            FormatConfig::default(),
            None,
        )
        .await
        .unwrap();

        sink.deliver(
            item(dir.path().join("a.png"), "https://example.com/a.png"),
            &stats,
        )
        .await
        .unwrap();
        sink.finish(&stats).await.unwrap();
        assert!(!temp.exists(), "temp directory removed after completion");
    }
}
