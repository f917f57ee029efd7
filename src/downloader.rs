//! High-level entry point for running a download batch
//!
//! Wraps configuration validation, HTTP client setup, sink selection, and the
//! queue controller behind one type. The browser is attached separately
//! because launching and owning a headless browser is the caller's concern.

use crate::config::{AnalysisMode, Config};
use crate::error::Result;
use crate::fetch::{BatchContext, BrowserDriver};
use crate::file_manager::ImageInfoList;
use crate::queue::process_queue;
use crate::sink::{BufferedSink, ImmediateSink, SaveSink};
use crate::types::{ImageInfo, QueueReport};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Downloads, analyzes, and saves batches of image URLs
pub struct ImageDownloader {
    ctx: BatchContext,
    info_list: ImageInfoList,
}

impl ImageDownloader {
    /// Create a downloader, validating the configuration up front
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let ctx = BatchContext::new(Arc::new(config))?;
        Ok(Self {
            ctx,
            info_list: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Attach a browser handle, enabling the browser fetch strategy
    pub fn with_browser(mut self, browser: Arc<dyn BrowserDriver>) -> Self {
        self.ctx = self.ctx.with_browser(browser);
        self
    }

    /// The configuration this downloader runs with
    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Whether the attached browser (if any) is still usable
    pub fn browser_alive(&self) -> bool {
        self.ctx.browser_alive()
    }

    /// Request a graceful stop of any in-flight batch
    ///
    /// In-flight chunk items finish; remaining URLs are reported as failed.
    /// The downloader cannot be reused after shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        self.ctx.cancel.cancel();
    }

    /// Download every URL into `target_dir`, or the configured output
    /// directory when `None`
    ///
    /// The analysis mode in the configuration decides whether payloads are
    /// written as they validate or held until the whole batch has downloaded.
    pub async fn download_all(
        &self,
        urls: &[String],
        target_dir: Option<&Path>,
    ) -> Result<QueueReport> {
        let config = &self.ctx.config;
        let target = target_dir.unwrap_or(&config.download.output_dir);
        tracing::info!(
            count = urls.len(),
            target = %target.display(),
            mode = ?config.analysis.mode,
            "starting download batch"
        );

        let sink: Box<dyn SaveSink> = match config.analysis.mode {
            AnalysisMode::Inline => Box::new(ImmediateSink::new(
                config.format.clone(),
                Some(self.info_list.clone()),
            )),
            AnalysisMode::TwoPhase => Box::new(
                BufferedSink::new(
                    &config.analysis,
                    config.format.clone(),
                    Some(self.info_list.clone()),
                )
                .await?,
            ),
        };

        process_queue(urls, target, &self.ctx, sink.as_ref()).await
    }

    /// Records of every image saved so far, across batches
    pub fn saved_images(&self) -> Vec<ImageInfo> {
        self.info_list
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}
