use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossbeam_channel::{unbounded, Sender};
use image::RgbaImage;
use tokio::sync::mpsc::UnboundedSender;

use super::tiling::Tile;
use crate::error::{ScanError, ScanResult};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "OcrPool";

use crate::{log_error, log_info};

/// A text-extraction engine instance. Each pool worker owns one and runs one
/// recognition at a time on it.
pub trait TextRecognizer: Send {
    fn recognize(&mut self, image: &RgbaImage) -> Result<String>;
}

/// Builds the recognizer for worker `index`. Called once per worker at startup.
pub trait RecognizerFactory: Send + Sync + 'static {
    fn create(&self, index: usize) -> Result<Box<dyn TextRecognizer>>;
}

impl<F> RecognizerFactory for F
where
    F: Fn(usize) -> Result<Box<dyn TextRecognizer>> + Send + Sync + 'static,
{
    fn create(&self, index: usize) -> Result<Box<dyn TextRecognizer>> {
        self(index)
    }
}

pub(crate) struct OcrJob {
    pub tile: Tile,
    pub image: RgbaImage,
    pub reply: UnboundedSender<OcrResult>,
}

/// Recognized text for one tile, or the reason it failed.
#[derive(Debug)]
pub struct OcrResult {
    pub tile: Tile,
    pub text: std::result::Result<String, String>,
}

/// Fixed set of long-lived OCR workers fed from one shared job queue.
///
/// Excess jobs wait in the queue; dropping the pool closes the queue and joins
/// every worker after it drains.
pub struct OcrWorkerPool {
    sender: Option<Sender<OcrJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl OcrWorkerPool {
    /// Spawns `size` workers and waits until each one has built its recognizer.
    pub fn start<F: RecognizerFactory>(size: usize, factory: F) -> ScanResult<Self> {
        if size == 0 {
            return Err(ScanError::InvalidConfig("OCR pool needs at least one worker".into()));
        }

        let factory = Arc::new(factory);
        let (job_tx, job_rx) = unbounded::<OcrJob>();
        let (ready_tx, ready_rx) = mpsc::channel::<(usize, Result<()>)>();
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let factory = Arc::clone(&factory);
            let job_rx = job_rx.clone();
            let ready_tx = ready_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("tabguard-ocr-{index}"))
                .spawn(move || {
                    let mut recognizer = match factory.create(index) {
                        Ok(recognizer) => recognizer,
                        Err(err) => {
                            let _ = ready_tx.send((index, Err(err)));
                            return;
                        }
                    };
                    if ready_tx.send((index, Ok(()))).is_err() {
                        return;
                    }
                    drop(ready_tx);

                    while let Ok(job) = job_rx.recv() {
                        let text = run_job(recognizer.as_mut(), &job);
                        if job.reply.send(OcrResult { tile: job.tile, text }).is_err() {
                            log_error!("caller dropped before tile ({}, {}) finished", job.tile.row, job.tile.col);
                        }
                    }
                })
                .map_err(|err| ScanError::WorkerPool(format!("failed to spawn OCR worker: {err}")))?;
            workers.push(handle);
        }
        drop(ready_tx);

        let mut pool = Self {
            sender: Some(job_tx),
            workers,
        };

        for _ in 0..size {
            match ready_rx.recv() {
                Ok((_, Ok(()))) => {}
                Ok((index, Err(err))) => {
                    pool.shutdown();
                    return Err(ScanError::WorkerPool(format!(
                        "OCR worker {index} failed to initialize: {err:#}"
                    )));
                }
                Err(_) => {
                    pool.shutdown();
                    return Err(ScanError::WorkerPool(
                        "OCR worker exited before signaling readiness".into(),
                    ));
                }
            }
        }

        log_info!("started {} OCR workers", size);
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn submit(&self, job: OcrJob) -> ScanResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ScanError::WorkerPool("pool is shut down".into()))?;
        sender
            .send(job)
            .map_err(|_| ScanError::WorkerPool("all OCR workers have exited".into()))
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if let Err(err) = handle.join() {
                log_error!("OCR worker panicked during shutdown: {err:?}");
            }
        }
    }
}

impl Drop for OcrWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_job(recognizer: &mut dyn TextRecognizer, job: &OcrJob) -> std::result::Result<String, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| recognizer.recognize(&job.image))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(_) => Err("recognizer panicked".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Constant(&'static str);

    impl TextRecognizer for Constant {
        fn recognize(&mut self, _image: &RgbaImage) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn builds_one_recognizer_per_worker() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let pool = OcrWorkerPool::start(3, move |_index: usize| -> Result<Box<dyn TextRecognizer>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Constant("hi")) as Box<dyn TextRecognizer>)
        })
        .unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(built.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn init_failure_is_reported() {
        let result = OcrWorkerPool::start(2, |index: usize| -> Result<Box<dyn TextRecognizer>> {
            if index == 1 {
                Err(anyhow!("missing traineddata"))
            } else {
                Ok(Box::new(Constant("x")) as Box<dyn TextRecognizer>)
            }
        });
        match result {
            Err(ScanError::WorkerPool(message)) => assert!(message.contains("missing traineddata")),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("pool should not start"),
        }
    }

    #[test]
    fn zero_workers_is_invalid() {
        let result = OcrWorkerPool::start(0, |_index: usize| -> Result<Box<dyn TextRecognizer>> {
            Ok(Box::new(Constant("x")) as Box<dyn TextRecognizer>)
        });
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn panicking_recognizer_becomes_tile_failure() {
        struct Boom;
        impl TextRecognizer for Boom {
            fn recognize(&mut self, _image: &RgbaImage) -> Result<String> {
                panic!("engine blew up");
            }
        }

        let pool = OcrWorkerPool::start(1, |_index: usize| -> Result<Box<dyn TextRecognizer>> {
            Ok(Box::new(Boom))
        })
        .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let tile = Tile { row: 0, col: 0, left: 0, top: 0, width: 2, height: 2 };
        pool.submit(OcrJob { tile, image: RgbaImage::new(2, 2), reply: tx }).unwrap();
        let result = rx.blocking_recv().unwrap();
        assert_eq!(result.tile, tile);
        assert!(result.text.unwrap_err().contains("panicked"));
    }
}
