//! HTTP upload surface.
//!
//! `POST /vior-image` and `POST /vior-video` accept a multipart upload in the
//! `file` field and answer with the grouped detection report.
//! `GET /health` answers `{"status":"ok"}`.
//!
//! Image uploads are read into memory, bounded by the upload limit. Video
//! uploads stream from the socket into a temporary file in 1 MiB chunks. At
//! most `max_connections` requests are served at once; the accept loop answers
//! 503 past that.

mod multipart;

use crate::error::{VisionError, VisionResult};
use crate::ingest::{FileSource, FrameSource, DEFAULT_SAMPLE_STRIDE};
use crate::pipeline::Pipeline;
use crate::report::Report;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use multipart::{FilePart, PartHead};
use multipart::{MultipartReader, PartCopy};

const MAX_HEADER_BYTES: usize = 16 * 1024;
/// Allowance for multipart boundaries and part headers on top of the file limit.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;
const UPLOAD_CHUNK_BYTES: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];
pub const ALLOWED_VIDEO_TYPES: [&str; 4] = [
    "video/mp4",
    "video/avi",
    "video/quicktime",
    "video/x-matroska",
];

const INVALID_IMAGE_TYPE: &str = "Invalid file type. Supported formats: JPG, JPEG, PNG, WebP";
const INVALID_VIDEO_TYPE: &str = "Invalid file type. Supported formats: MP4, AVI, MOV, MKV";

/// Request body bytes read along with the head, then the rest of `Content-Length` from the socket.
type BodyReader<'a> = std::io::Chain<Cursor<Vec<u8>>, std::io::Take<&'a mut TcpStream>>;

/// Opens a stored upload as a frame source.
pub type VideoOpener = Arc<dyn Fn(&Path) -> VisionResult<Box<dyn FrameSource>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: u64,
    pub max_connections: usize,
    pub sample_stride: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
            max_connections: 16,
            sample_stride: DEFAULT_SAMPLE_STRIDE,
        }
    }
}

impl ApiConfig {
    fn too_large_message(&self) -> String {
        const MIB: u64 = 1024 * 1024;
        if self.max_upload_bytes % MIB == 0 {
            format!(
                "File size too large. Maximum size is {}MB",
                self.max_upload_bytes / MIB
            )
        } else {
            format!(
                "File size too large. Maximum size is {} bytes",
                self.max_upload_bytes
            )
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting, wait for in-flight requests, and join the server thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Pipeline,
    open_video: VideoOpener,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Pipeline) -> Self {
        Self {
            cfg,
            pipeline,
            open_video: Arc::new(|path: &Path| {
                FileSource::open(path).map(|source| Box::new(source) as Box<dyn FrameSource>)
            }),
        }
    }

    /// Replace how stored video uploads are opened.
    pub fn with_video_opener(mut self, open_video: VideoOpener) -> Self {
        self.open_video = open_video;
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let handler = Arc::new(Handler {
            cfg: self.cfg,
            pipeline: self.pipeline,
            open_video: self.open_video,
        });
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, handler, shutdown_thread) {
                log::error!("vior api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, handler: Arc<Handler>, shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                workers.retain(|worker| !worker.is_finished());
                if workers.len() >= handler.cfg.max_connections {
                    log::warn!(
                        "vior api busy ({} requests in flight), refusing {}",
                        workers.len(),
                        peer
                    );
                    if let Err(err) = refuse_busy(stream) {
                        log::debug!("busy response to {} failed: {:#}", peer, err);
                    }
                    continue;
                }
                let handler = handler.clone();
                workers.push(std::thread::spawn(move || {
                    if let Err(err) = handler.handle_connection(stream) {
                        log::warn!("vior api request from {} failed: {:#}", peer, err);
                    }
                }));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}

fn refuse_busy(mut stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    write_json_response(&mut stream, 503, br#"{"error":"server busy"}"#)
}

struct Handler {
    cfg: ApiConfig,
    pipeline: Pipeline,
    open_video: VideoOpener,
}

#[derive(Serialize)]
struct SuccessBody<'a> {
    status: &'static str,
    filename: &'a str,
    detections: &'a Report,
}

impl Handler {
    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let head = match read_head(&mut stream) {
            Ok(head) => head,
            Err(err) => {
                write_error(&mut stream, &err)?;
                return Err(err.into());
            }
        };

        let method = head.request.method.clone();
        let path = head.request.path.clone();
        match (method.as_str(), path.as_str()) {
            ("GET", "/health") => write_json_response(&mut stream, 200, br#"{"status":"ok"}"#),
            ("POST", "/vior-image") | ("POST", "/vior-video") => {
                let video = path == "/vior-video";
                match self.handle_upload(&mut stream, head, video) {
                    Ok(body) => write_json_response(&mut stream, 200, &body),
                    Err(err) => {
                        log::warn!("vior api upload rejected: {}", err);
                        write_error(&mut stream, &err)
                    }
                }
            }
            (_, "/health") | (_, "/vior-image") | (_, "/vior-video") => {
                write_json_response(&mut stream, 405, br#"{"error":"method_not_allowed"}"#)
            }
            _ => write_json_response(&mut stream, 404, br#"{"error":"not_found"}"#),
        }
    }

    fn handle_upload(
        &self,
        stream: &mut TcpStream,
        head: RequestHead,
        video: bool,
    ) -> VisionResult<Vec<u8>> {
        let boundary = multipart::boundary(
            head.request
                .headers
                .get("content-type")
                .map(String::as_str)
                .unwrap_or_default(),
        )?;
        let (length, mut body) = body_reader(stream, head, self.body_limit(), &self.cfg)?;

        let result = if video {
            self.upload_video(&mut body, &boundary)
        } else {
            self.upload_image(&mut body, length, &boundary)
        };

        // unread body bytes would turn the close into a reset
        if let Err(err) = std::io::copy(&mut body, &mut std::io::sink()) {
            log::debug!("discarding rest of request body failed: {}", err);
        }
        result
    }

    fn upload_image(
        &self,
        body: &mut BodyReader<'_>,
        length: u64,
        boundary: &str,
    ) -> VisionResult<Vec<u8>> {
        let raw = read_body(body, length)?;
        let part = multipart::file_part(&raw, boundary, "file")?;
        let report = self.process_image(&part)?;
        success_body(&part.filename, &report)
    }

    fn process_image(&self, part: &FilePart<'_>) -> VisionResult<Report> {
        if !ALLOWED_IMAGE_TYPES.contains(&part.content_type.as_str()) {
            return Err(VisionError::invalid_input(INVALID_IMAGE_TYPE));
        }
        if part.data.len() as u64 > self.cfg.max_upload_bytes {
            return Err(VisionError::invalid_input(self.cfg.too_large_message()));
        }
        self.pipeline.process_image_bytes(part.data)
    }

    fn upload_video(&self, body: &mut BodyReader<'_>, boundary: &str) -> VisionResult<Vec<u8>> {
        let mut parts = MultipartReader::new(body, boundary, UPLOAD_CHUNK_BYTES);
        let part = parts.find_part("file")?;
        if !ALLOWED_VIDEO_TYPES.contains(&part.content_type.as_str()) {
            return Err(VisionError::invalid_input(INVALID_VIDEO_TYPE));
        }
        let mut temp = tempfile::Builder::new()
            .prefix("vior-upload-")
            .suffix(&upload_suffix(&part.filename))
            .tempfile()?;

        let result = self.store_and_process(&mut temp, &mut parts);

        let path = temp.path().to_path_buf();
        if let Err(err) = temp.close() {
            let err = VisionError::CleanupFailure(format!(
                "failed to remove {}: {}",
                path.display(),
                err
            ));
            log::warn!("{}", err);
        }
        success_body(&part.filename, &result?)
    }

    fn store_and_process<R: Read>(
        &self,
        temp: &mut tempfile::NamedTempFile,
        parts: &mut MultipartReader<R>,
    ) -> VisionResult<Report> {
        match parts.copy_part(temp, self.cfg.max_upload_bytes)? {
            PartCopy::OverLimit => {
                return Err(VisionError::invalid_input(self.cfg.too_large_message()))
            }
            PartCopy::Complete(written) => {
                log::debug!("stored {} upload bytes at {}", written, temp.path().display())
            }
        }
        temp.flush()?;

        let source = (self.open_video)(temp.path())?;
        self.pipeline
            .process_video(source, Some(self.cfg.sample_stride))
    }

    fn body_limit(&self) -> u64 {
        self.cfg
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }
}

fn success_body(filename: &str, report: &Report) -> VisionResult<Vec<u8>> {
    serde_json::to_vec(&SuccessBody {
        status: "success",
        filename,
        detections: report,
    })
    .map_err(|e| VisionError::processing(format!("encode response: {}", e)))
}

/// Extension of the uploaded name, kept so decoders can sniff by suffix.
fn upload_suffix(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

/// Parsed request line and headers, plus any body bytes read along with them.
struct RequestHead {
    request: HttpRequest,
    body_prefix: Vec<u8>,
}

fn read_head(stream: &mut TcpStream) -> VisionResult<RequestHead> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(at) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break at;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(VisionError::invalid_input("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(VisionError::invalid_input("connection closed before request completed"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| VisionError::invalid_input("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| VisionError::invalid_input("missing method"))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| VisionError::invalid_input("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(RequestHead {
        request: HttpRequest {
            method: method.to_string(),
            path,
            headers,
        },
        body_prefix: data[header_end + 4..].to_vec(),
    })
}

/// Body of the request limited to its `Content-Length`, which must not pass `limit`.
fn body_reader<'a>(
    stream: &'a mut TcpStream,
    head: RequestHead,
    limit: u64,
    cfg: &ApiConfig,
) -> VisionResult<(u64, BodyReader<'a>)> {
    let length: u64 = head
        .request
        .headers
        .get("content-length")
        .ok_or_else(|| VisionError::invalid_input("Content-Length required"))?
        .parse()
        .map_err(|_| VisionError::invalid_input("invalid Content-Length"))?;
    if length > limit {
        return Err(VisionError::invalid_input(cfg.too_large_message()));
    }

    let mut prefix = head.body_prefix;
    prefix.truncate(length as usize);
    let rest = length - prefix.len() as u64;
    Ok((length, Cursor::new(prefix).chain(stream.take(rest))))
}

/// Read the whole body in 1 MiB chunks.
fn read_body(body: &mut BodyReader<'_>, length: u64) -> VisionResult<Vec<u8>> {
    let mut out = Vec::with_capacity(length.min(UPLOAD_CHUNK_BYTES as u64) as usize);
    let mut chunk = vec![0u8; UPLOAD_CHUNK_BYTES];
    while (out.len() as u64) < length {
        let n = body.read(&mut chunk)?;
        if n == 0 {
            return Err(VisionError::invalid_input("request body truncated"));
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

fn write_error(stream: &mut TcpStream, err: &VisionError) -> Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": err.to_string() }))?;
    write_json_response(stream, err.status_code(), &body)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> Result<()> {
    write_response(stream, status, "application/json", body)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
