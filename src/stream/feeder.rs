//! Sample feeder for the real-time transport

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use super::ticker::pacing_interval;
use crate::store::FrameSource;
use crate::transport::MediaTrack;
use crate::types::FrameRate;

/// Spawn the feeder task.
///
/// `peers` carries the number of active peer sessions. While it is zero the feeder does not
/// touch the frame source or the track at all.
pub fn spawn<S: FrameSource>(
    source: S,
    track: Arc<dyn MediaTrack>,
    rate: FrameRate,
    peers: watch::Receiver<usize>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(source, track, rate, peers, cancel))
}

pub async fn run<S: FrameSource>(
    source: S,
    track: Arc<dyn MediaTrack>,
    rate: FrameRate,
    peers: watch::Receiver<usize>,
    cancel: CancellationToken,
) {
    let period = rate.period();
    let mut ticker = pacing_interval(period);
    let mut fed = 0u64;
    info!(fps = rate.fps(), "Sample feeder started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if *peers.borrow() == 0 {
            continue;
        }
        let Some(frame) = source.latest() else { continue };

        match track.write_sample(frame.data, period).await {
            Ok(()) => fed += 1,
            Err(e) if e.is_closed_pipe() => trace!("Sample dropped, pipe closed"),
            Err(e) => warn!("Failed to write video sample: {}", e),
        }
    }

    info!("Sample feeder stopped after {} samples", fed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FrameStore;
    use crate::test_utils::{CountingSource, MockTrack, tiny_jpeg};
    use crate::transport::TransportError;
    use crate::types::{CapturedFrame, PixelFormat};
    use std::time::Duration;

    fn source_with_frame() -> CountingSource {
        let store = FrameStore::new();
        store.publish(CapturedFrame::new(tiny_jpeg(1), PixelFormat::Mjpeg));
        CountingSource::new(store)
    }

    #[tokio::test(start_paused = true)]
    async fn no_reads_while_no_peers_are_active() {
        let source = source_with_frame();
        let track = Arc::new(MockTrack::default());
        let (_peers_tx, peers_rx) = watch::channel(0usize);
        let cancel = CancellationToken::new();

        let task = spawn(source.clone(), track.clone(), FrameRate::new(30), peers_rx, cancel.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(source.reads(), 0);
        assert_eq!(track.samples(), 0);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn feeds_one_sample_per_tick_with_tick_duration() {
        let source = source_with_frame();
        let track = Arc::new(MockTrack::default());
        let (peers_tx, peers_rx) = watch::channel(0usize);
        let cancel = CancellationToken::new();

        let task = spawn(source.clone(), track.clone(), FrameRate::new(10), peers_rx, cancel.clone());
        peers_tx.send(1).unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        cancel.cancel();
        task.await.unwrap();

        // Ticks at 0, 100, 200, 300, 400ms
        assert_eq!(track.samples(), 5);
        assert_eq!(source.reads(), 5);
        assert_eq!(track.last_duration(), Some(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_skip_the_tick_and_feeding_continues() {
        let source = source_with_frame();
        let track = Arc::new(MockTrack::default());
        track.fail_next(TransportError::ClosedPipe);
        track.fail_next(TransportError::failed("write_sample", "rtp error"));
        let (_peers_tx, peers_rx) = watch::channel(1usize);
        let cancel = CancellationToken::new();

        let task = spawn(source, track.clone(), FrameRate::new(10), peers_rx, cancel.clone());
        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(track.attempts(), 4);
        assert_eq!(track.samples(), 2);
    }
}
