//! End-to-end tests: readiness, queued detections and teardown through a
//! [`Session`].

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kontur_pipeline::{
    Backend, DetectOptions, EdgeMode, NativeHeap, Observer, PipelineError, Surface,
};
use kontur_tasks::{ReadinessPolicy, Session, SessionConfig, SessionError, TaskError};

/// Black `size` x `size` RGBA surface with a centered white square.
fn centered_square(size: u32, side: u32) -> Surface {
    let lo = (size - side) / 2;
    let hi = lo + side;
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let v = if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                255
            } else {
                0
            };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    Surface::new(size, size, pixels).unwrap()
}

fn ready_session() -> Session {
    let heap = NativeHeap::new();
    assert!(heap.probe());
    Session::new(heap, SessionConfig::default())
}

#[derive(Default)]
struct Messages(Mutex<Vec<String>>);

impl Observer for Messages {
    fn user_message(&self, text: &str, _duration: Duration) {
        self.0.lock().unwrap().push(text.to_owned());
    }
}

#[tokio::test]
async fn detects_the_reference_square() {
    let session = ready_session();
    let result = session
        .detect(centered_square(200, 100), DetectOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total, 1);
    assert!(result.secondary.is_empty());
    assert!((9_000.0..=11_500.0).contains(&result.primary.area));
    assert!(session.shape(&result.primary).unwrap().len() >= 4);

    result.release();
    assert_eq!(session.heap().live_count(), 1);
}

#[tokio::test]
async fn detections_complete_in_submission_order() {
    let session = ready_session();
    let first = session.detect(centered_square(120, 60), DetectOptions::default());
    let second = session.detect(
        centered_square(90, 40),
        DetectOptions {
            mode: EdgeMode::Gradient,
            ..DetectOptions::default()
        },
    );

    let second = second.await.unwrap();
    // The second task only starts after the first has settled.
    let first = first.await.unwrap();
    assert_eq!(session.snapshot().unwrap().dimensions(), (90, 90));

    first.release();
    second.release();
    assert_eq!(session.heap().live_count(), 1);
}

#[tokio::test]
async fn failures_are_isolated_and_reported() {
    let messages = Arc::new(Messages::default());
    let heap = NativeHeap::new();
    heap.probe();
    let session = Session::with_observer(heap, SessionConfig::default(), messages.clone());

    let degenerate = session.detect(Surface::new(0, 0, Vec::new()).unwrap(), DetectOptions::default());
    let blank = session.detect(
        Surface::new(32, 32, vec![90; 32 * 32 * 4]).unwrap(),
        DetectOptions::default(),
    );
    let good = session.detect(centered_square(100, 50), DetectOptions::default());

    assert!(matches!(
        degenerate.await,
        Err(TaskError::Failed(SessionError::Pipeline(PipelineError::InvalidInput(_))))
    ));
    assert!(matches!(
        blank.await,
        Err(TaskError::Failed(SessionError::Pipeline(PipelineError::NoEdgesFound)))
    ));
    let result = good.await.unwrap();
    assert_eq!(result.total, 1);
    result.release();

    let messages = messages.0.lock().unwrap();
    assert!(
        messages
            .iter()
            .any(|m| m.starts_with("auto detection on 0x0 failed: invalid input surface")),
        "{messages:?}",
    );
    assert!(
        messages
            .iter()
            .any(|m| m == "auto detection on 32x32 failed: no clear edges found in the image"),
        "{messages:?}",
    );
    assert!(messages.iter().any(|m| m == "found 1 contour(s)"));
}

#[tokio::test]
async fn detection_before_readiness_fails() {
    let session = Session::new(NativeHeap::new(), SessionConfig::default());
    let err = session
        .detect(centered_square(60, 30), DetectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TaskError::Failed(SessionError::Pipeline(PipelineError::BackendNotReady))
    ));
}

#[tokio::test]
async fn waits_for_a_loading_backend() {
    let messages = Arc::new(Messages::default());
    let (heap, loader) = NativeHeap::deferred();
    let session = Session::with_observer(heap, SessionConfig::default(), messages.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        loader.finish();
    });

    session.wait_until_ready().await.unwrap();
    assert!(session.heap().is_ready());
    assert_eq!(messages.0.lock().unwrap().as_slice(), ["image backend ready"]);

    let result = session
        .detect(centered_square(80, 40), DetectOptions::default())
        .await
        .unwrap();
    result.release();
}

#[tokio::test]
async fn readiness_times_out() {
    let (heap, _loader) = NativeHeap::deferred();
    let config = SessionConfig {
        readiness: ReadinessPolicy {
            initial_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(80),
            ..ReadinessPolicy::default()
        },
        ..SessionConfig::default()
    };
    let session = Session::new(heap, config);
    assert!(matches!(
        session.wait_until_ready().await,
        Err(PipelineError::BackendNotReady)
    ));
}

#[tokio::test]
async fn shutdown_releases_retained_buffers() {
    let session = ready_session();
    session
        .detect(centered_square(100, 50), DetectOptions::default())
        .await
        .unwrap()
        .release();
    assert_eq!(session.heap().live_count(), 1);

    session.shutdown().await;
    assert_eq!(session.heap().live_count(), 0);
    assert!(session.snapshot().is_none());
    assert_eq!(session.executor().queue_len(), 0);
}

#[tokio::test]
async fn shutdown_drops_queued_detections() {
    let session = ready_session();
    let running = session.detect(centered_square(150, 70), DetectOptions::default());
    let queued = session.detect(centered_square(150, 70), DetectOptions::default());
    // Let the first task get picked up.
    tokio::time::sleep(Duration::from_millis(5)).await;

    session.shutdown().await;

    if let Ok(result) = running.await {
        result.release();
    }
    assert!(matches!(queued.await, Err(TaskError::Dropped)));
    assert_eq!(session.heap().live_count(), 0);
}
