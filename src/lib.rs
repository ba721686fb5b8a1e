//! Webcam sign-alphabet classification served to the browser.
//!
//! Frames are captured from a local camera, streamed to the browser as MJPEG
//! and periodically run through an ONNX classifier. The best label is pushed
//! to the page whenever it changes.

pub mod endpoints;
pub mod meter;
pub mod nn;
pub mod pipeline;
pub mod sensors;
pub mod utils;

use bytes::Bytes;

/// Wrap a JPEG buffer as one item of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(jpeg: &[u8]) -> Bytes {
    Bytes::from(
        [
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            jpeg,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
