// Rationale: a dispatched frame is owned by the worker until its outcome
// comes back; callers cannot touch it mid-inference.
use std::sync::{Arc, Mutex};

use sightline::{DetectorBackend, DetectorWorker, ModelParams, StillImage, StubBackend};

fn main() {
    let backend: Arc<Mutex<dyn DetectorBackend>> = Arc::new(Mutex::new(StubBackend::new()));
    let worker = DetectorWorker::spawn(backend);

    let frame = StillImage::from_rgb(image::RgbImage::new(4, 4)).acquire();
    worker.dispatch(frame, 0, ModelParams::default()).unwrap();

    let _width = frame.width;
}
