//! Pull-based multipart MJPEG distributor

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::store::FrameSource;
use crate::types::{Frame, FrameRate};

/// Multipart boundary token
pub const BOUNDARY: &str = "frame";

/// Response content type for the MJPEG stream
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Retry interval while capture has not produced a frame yet
pub const NO_FRAME_BACKOFF: Duration = Duration::from_millis(50);

/// Parts buffered between the client task and the HTTP body
const PART_BUFFER: usize = 1;

/// Encode one self-delimited multipart record.
pub fn encode_part(frame: &Frame) -> Bytes {
    let header = format!(
        "\r\n--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len());
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.data);
    part.freeze()
}

/// Spawn the per-client task and return the body stream it feeds.
///
/// Dropping the returned stream ends the task.
pub fn spawn<S: FrameSource>(
    source: S,
    rate: FrameRate,
    remote: String,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let (tx, rx) = mpsc::channel(PART_BUFFER);
    tokio::spawn(async move {
        info!(%remote, "New MJPEG stream client");
        run(source, rate, tx).await;
        info!(%remote, "MJPEG stream client disconnected");
    });
    ReceiverStream::new(rx).map(Ok)
}

/// Read-then-sleep loop for one client. Returns when the client goes away.
pub async fn run<S: FrameSource>(source: S, rate: FrameRate, tx: mpsc::Sender<Bytes>) {
    let period = rate.period();
    let mut last_sequence = 0u64;

    loop {
        let pause = match source.latest() {
            Some(frame) if frame.sequence >= last_sequence => {
                last_sequence = frame.sequence;
                if tx.send(encode_part(&frame)).await.is_err() {
                    debug!("MJPEG write failed, closing stream");
                    return;
                }
                period
            }
            _ => NO_FRAME_BACKOFF,
        };

        tokio::select! {
            _ = tx.closed() => return,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FrameStore;
    use crate::test_utils::{CountingSource, tiny_jpeg};
    use crate::types::{CapturedFrame, PixelFormat};

    /// Split a part into (declared length, payload)
    fn parse_part(part: &[u8]) -> (usize, Vec<u8>) {
        let text_end = part.windows(4).skip(1).position(|w| w == b"\r\n\r\n").unwrap() + 1;
        let header = std::str::from_utf8(&part[..text_end]).unwrap();
        assert!(header.starts_with("\r\n--frame\r\nContent-Type: image/jpeg\r\n"));
        let length = header
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        (length, part[text_end + 4..].to_vec())
    }

    #[test]
    fn part_header_matches_payload() {
        let store = FrameStore::new();
        store.publish(CapturedFrame::new(tiny_jpeg(3), PixelFormat::Mjpeg));
        let frame = store.latest().unwrap();

        let part = encode_part(&frame);
        let (length, payload) = parse_part(&part);
        assert_eq!(length, frame.len());
        assert_eq!(payload, frame.data.as_ref());
    }

    #[tokio::test(start_paused = true)]
    async fn client_sees_two_or_three_frames_in_250ms_at_10fps() {
        let store = FrameStore::new();
        let publisher = store.clone();
        tokio::spawn(async move {
            for i in 1..=5u8 {
                publisher.publish(CapturedFrame::new(tiny_jpeg(i), PixelFormat::Mjpeg));
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
        tokio::task::yield_now().await;

        let mut body = Box::pin(spawn(store, FrameRate::new(10), "test".into()));
        let deadline = tokio::time::sleep(Duration::from_millis(250));
        tokio::pin!(deadline);

        let mut parts = Vec::new();
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                part = body.next() => parts.push(part.unwrap().unwrap()),
            }
        }

        assert!((2..=3).contains(&parts.len()), "saw {} parts", parts.len());
        for part in &parts {
            let (length, payload) = parse_part(part);
            assert_eq!(length, payload.len());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_until_first_frame() {
        let store = FrameStore::new();
        let source = CountingSource::new(store.clone());
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(run(source.clone(), FrameRate::new(30), tx));

        tokio::time::sleep(Duration::from_millis(175)).await;
        assert!(rx.try_recv().is_err());
        // Reads at 0, 50, 100, 150ms
        assert_eq!(source.reads(), 4);

        store.publish(CapturedFrame::new(tiny_jpeg(1), PixelFormat::Mjpeg));
        let part = rx.recv().await.unwrap();
        assert_eq!(parse_part(&part).1, tiny_jpeg(1));
    }

    #[tokio::test(start_paused = true)]
    async fn ends_when_client_disconnects() {
        let store = FrameStore::new();
        store.publish(CapturedFrame::new(tiny_jpeg(1), PixelFormat::Mjpeg));

        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(run(store, FrameRate::new(1), tx));
        rx.recv().await.unwrap();
        drop(rx);

        // Loop is sleeping for a full second; the disconnect must cut it short
        tokio::time::timeout(Duration::from_millis(10), task).await.unwrap().unwrap();
    }
}
