use anyhow::Result;
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use vior::api::{ApiConfig, ApiHandle, ApiServer, VideoOpener};
use vior::{
    BoundingBox, Detection, DetectorPool, FrameSource, MemorySource, Pipeline, StubBackend,
    VisionResult,
};

const BOUNDARY: &str = "vior-test-boundary";
const MAX_UPLOAD: u64 = 8192;

fn det(label: &str, cx: f32, cy: f32, confidence: f32) -> Detection {
    Detection::new(label, confidence, BoundingBox::around(cx, cy, 8.0, 8.0))
}

fn api_config() -> ApiConfig {
    ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        max_upload_bytes: MAX_UPLOAD,
        max_connections: 16,
        sample_stride: 30,
    }
}

fn spawn(script: Vec<Vec<Detection>>) -> Result<ApiHandle> {
    let pipeline = Pipeline::new(Arc::new(DetectorPool::single(StubBackend::scripted(script))));
    ApiServer::new(api_config(), pipeline).spawn()
}

fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::new(width, height);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn upload_request(path: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let mut request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);
    request
}

fn send(handle: &ApiHandle, request: &[u8]) -> Result<(u16, Value)> {
    let mut stream = TcpStream::connect(handle.addr)?;
    stream.write_all(request)?;
    read_response(&mut stream)
}

fn read_response(stream: &mut TcpStream) -> Result<(u16, Value)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or_default();
    let body = parts.next().unwrap_or_default();
    let status = head
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .parse()?;
    Ok((status, serde_json::from_str(body)?))
}

fn error_of(value: &Value) -> &str {
    value["error"].as_str().unwrap_or_default()
}

#[test]
fn health_and_unknown_routes() -> Result<()> {
    let handle = spawn(Vec::new())?;

    let (status, body) = send(&handle, b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, _) = send(&handle, b"GET /nope HTTP/1.1\r\n\r\n")?;
    assert_eq!(status, 404);

    let (status, _) = send(&handle, b"GET /vior-image HTTP/1.1\r\n\r\n")?;
    assert_eq!(status, 405);

    handle.stop()
}

#[test]
fn image_upload_reports_every_detection() -> Result<()> {
    let handle = spawn(vec![vec![
        det("person", 10.0, 10.0, 0.91234),
        det("person", 12.0, 10.0, 0.5),
        det("dog", 60.0, 40.0, 0.7),
    ]])?;

    let png = encode_png(64, 48);
    let (status, body) = send(
        &handle,
        &upload_request("/vior-image", "cam.png", "image/png", &png),
    )?;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["status"], "success");
    assert_eq!(body["filename"], "cam.png");

    let people = body["detections"]["person"].as_array().unwrap();
    assert_eq!(people.len(), 2, "image mode never merges");
    assert_eq!(people[0]["object_id"], "person_1");
    assert_eq!(people[0]["position"], "top-left");
    assert_eq!(people[0]["confidence"], 0.912);
    assert_eq!(people[1]["object_id"], "person_2");
    assert_eq!(body["detections"]["dog"][0]["position"], "bottom-right");

    handle.stop()
}

#[test]
fn image_upload_rejections() -> Result<()> {
    let handle = spawn(Vec::new())?;

    let (status, body) = send(
        &handle,
        &upload_request("/vior-image", "doc.gif", "image/gif", b"GIF89a"),
    )?;
    assert_eq!(status, 400);
    assert_eq!(
        error_of(&body),
        "Invalid file type. Supported formats: JPG, JPEG, PNG, WebP"
    );

    let (status, body) = send(
        &handle,
        &upload_request("/vior-image", "x.jpg", "image/jpeg", b"definitely not a jpeg"),
    )?;
    assert_eq!(status, 400);
    assert_eq!(error_of(&body), "Could not decode image file");

    let big = vec![0u8; MAX_UPLOAD as usize + 1];
    let (status, body) = send(
        &handle,
        &upload_request("/vior-image", "big.png", "image/png", &big),
    )?;
    assert_eq!(status, 400);
    assert!(error_of(&body).starts_with("File size too large"));

    handle.stop()
}

#[test]
fn video_upload_is_stored_processed_and_removed() -> Result<()> {
    let seen: Arc<Mutex<Option<(PathBuf, Vec<u8>)>>> = Arc::new(Mutex::new(None));
    let seen_opener = seen.clone();
    let opener: VideoOpener = Arc::new(move |path: &Path| -> VisionResult<Box<dyn FrameSource>> {
        let stored = std::fs::read(path)?;
        *seen_opener.lock().unwrap() = Some((path.to_path_buf(), stored));
        Ok(Box::new(MemorySource::blank(61, 640, 480)) as Box<dyn FrameSource>)
    });

    let pipeline = Pipeline::new(Arc::new(DetectorPool::single(StubBackend::scripted(vec![
        vec![det("person", 100.0, 100.0, 0.6)],
        vec![det("person", 110.0, 105.0, 0.8)],
        vec![det("person", 500.0, 400.0, 0.7)],
    ]))));
    let handle = ApiServer::new(api_config(), pipeline)
        .with_video_opener(opener)
        .spawn()?;

    let payload = b"\x00\x00\x00\x18ftypmp42 fake video payload".to_vec();
    let (status, body) = send(
        &handle,
        &upload_request("/vior-video", "walk.mp4", "video/mp4", &payload),
    )?;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["filename"], "walk.mp4");
    let people = body["detections"]["person"].as_array().unwrap();
    assert_eq!(people.len(), 2);
    assert_eq!(people[0]["position"], "top-left");
    assert_eq!(people[0]["confidence"], 0.8);
    assert_eq!(people[1]["position"], "bottom-right");

    let (path, stored) = seen.lock().unwrap().take().expect("opener called");
    assert_eq!(stored, payload);
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
    assert!(!path.exists(), "temporary upload must be removed");

    handle.stop()
}

#[test]
fn video_upload_rejections() -> Result<()> {
    let opened = Arc::new(Mutex::new(0usize));
    let opened_counter = opened.clone();
    let opener: VideoOpener = Arc::new(move |_: &Path| -> VisionResult<Box<dyn FrameSource>> {
        *opened_counter.lock().unwrap() += 1;
        Ok(Box::new(MemorySource::blank(1, 8, 8)) as Box<dyn FrameSource>)
    });
    let pipeline = Pipeline::new(Arc::new(DetectorPool::single(StubBackend::new())));
    let handle = ApiServer::new(api_config(), pipeline)
        .with_video_opener(opener)
        .spawn()?;

    let (status, body) = send(
        &handle,
        &upload_request("/vior-video", "clip.webm", "video/webm", b"webm"),
    )?;
    assert_eq!(status, 400);
    assert_eq!(
        error_of(&body),
        "Invalid file type. Supported formats: MP4, AVI, MOV, MKV"
    );

    let big = vec![7u8; MAX_UPLOAD as usize + 1];
    let (status, body) = send(
        &handle,
        &upload_request("/vior-video", "big.mkv", "video/x-matroska", &big),
    )?;
    assert_eq!(status, 400);
    assert!(error_of(&body).starts_with("File size too large"));

    assert_eq!(*opened.lock().unwrap(), 0);
    handle.stop()
}

#[test]
fn unopenable_video_is_a_client_error() -> Result<()> {
    // default opener: the payload is not a decodable video (or FFmpeg is not built in)
    let handle = spawn(Vec::new())?;
    let (status, body) = send(
        &handle,
        &upload_request("/vior-video", "broken.avi", "video/avi", b"not a video"),
    )?;
    assert_eq!(status, 400);
    assert_eq!(error_of(&body), "Could not open video file");
    handle.stop()
}

#[test]
fn video_upload_streams_across_chunks_and_stops_at_the_limit() -> Result<()> {
    const LIMIT: u64 = 3 * 1024 * 1024;
    let stored: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let stored_opener = stored.clone();
    let opener: VideoOpener = Arc::new(move |path: &Path| -> VisionResult<Box<dyn FrameSource>> {
        stored_opener.lock().unwrap().push(std::fs::read(path)?);
        Ok(Box::new(MemorySource::blank(1, 8, 8)) as Box<dyn FrameSource>)
    });
    let pipeline = Pipeline::new(Arc::new(DetectorPool::single(StubBackend::new())));
    let cfg = ApiConfig {
        max_upload_bytes: LIMIT,
        ..api_config()
    };
    let handle = ApiServer::new(cfg, pipeline)
        .with_video_opener(opener)
        .spawn()?;

    // a near-boundary sequence straddles the first 1 MiB read
    let mut payload: Vec<u8> = (0..LIMIT as usize - 7).map(|i| (i % 251) as u8).collect();
    let near = format!("\r\n--{}", &BOUNDARY[..BOUNDARY.len() - 1]);
    let at = 1024 * 1024 - 300;
    payload[at..at + near.len()].copy_from_slice(near.as_bytes());

    let (status, body) = send(
        &handle,
        &upload_request("/vior-video", "long.mov", "video/quicktime", &payload),
    )?;
    assert_eq!(status, 200, "{}", body);
    {
        let stored = stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0] == payload, "stored upload differs from the payload");
    }

    let over = vec![3u8; LIMIT as usize + 1];
    let (status, body) = send(
        &handle,
        &upload_request("/vior-video", "long.mov", "video/quicktime", &over),
    )?;
    assert_eq!(status, 400);
    assert_eq!(error_of(&body), "File size too large. Maximum size is 3MB");
    assert_eq!(stored.lock().unwrap().len(), 1, "oversized upload must not be opened");

    handle.stop()
}

#[test]
fn busy_server_answers_503_until_a_slot_frees() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(DetectorPool::single(StubBackend::new())));
    let cfg = ApiConfig {
        max_connections: 1,
        ..api_config()
    };
    let handle = ApiServer::new(cfg, pipeline).spawn()?;

    // holds the only slot: its worker waits for the rest of the head
    let mut slow = TcpStream::connect(handle.addr)?;
    slow.write_all(b"GET /health HTTP/1.1\r\n")?;

    let mut refused = TcpStream::connect(handle.addr)?;
    let (status, body) = read_response(&mut refused)?;
    assert_eq!(status, 503);
    assert_eq!(error_of(&body), "server busy");

    slow.write_all(b"Host: localhost\r\n\r\n")?;
    let (status, _) = read_response(&mut slow)?;
    assert_eq!(status, 200);

    // the finished worker is pruned on a later accept
    let mut status = 0;
    for _ in 0..50 {
        status = send(&handle, b"GET /health HTTP/1.1\r\n\r\n")?.0;
        if status == 200 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert_eq!(status, 200);

    handle.stop()
}
