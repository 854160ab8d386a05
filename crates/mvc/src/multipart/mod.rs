//! `multipart/form-data` resolution.
//!
//! The [`MultipartResolver`] streams the request body through an incremental decoder. Text
//! parts become request parameters, file parts become [`MultipartFile`]s that stay in memory
//! up to the configured threshold and spill to temporary files beyond it. Temporary files are
//! deleted by [`MultipartResolver::cleanup`], which the dispatcher runs once per request after
//! the response has been produced.

mod parser;

use crate::error::DispatchError;
use crate::params::ParamMap;
use crate::request::Request;
use bytes::{Bytes, BytesMut};
use http::Method;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http_body_util::BodyExt;
use mime::Mime;
use parser::{MultipartDecoder, PartHeaders, PartItem};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_FILE_SIZE_THRESHOLD: usize = 10 * 1024;

/// Limits of multipart resolution.
///
/// Size caps are in bytes, a negative cap is unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultipartConfig {
    max_upload_size: i64,
    max_file_size: i64,
    file_size_threshold: usize,
    temp_dir: Option<PathBuf>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self { max_upload_size: -1, max_file_size: -1, file_size_threshold: DEFAULT_FILE_SIZE_THRESHOLD, temp_dir: None }
    }
}

impl MultipartConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_upload_size(mut self, max_upload_size: i64) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }

    pub fn max_file_size(mut self, max_file_size: i64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn file_size_threshold(mut self, file_size_threshold: usize) -> Self {
        self.file_size_threshold = file_size_threshold;
        self
    }

    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub fn upload_limit(&self) -> Option<u64> {
        u64::try_from(self.max_upload_size).ok()
    }

    pub fn file_limit(&self) -> Option<u64> {
        u64::try_from(self.max_file_size).ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultipartResolver {
    config: MultipartConfig,
}

impl MultipartResolver {
    pub fn new(config: MultipartConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    /// Whether the request method carries a body and its content type is `multipart/*`.
    pub fn is_multipart(&self, req: &Request) -> bool {
        let method = req.method();
        let bodiless = [Method::GET, Method::HEAD, Method::DELETE, Method::OPTIONS, Method::CONNECT, Method::TRACE];
        if bodiless.contains(method) {
            return false;
        }
        content_type(req).is_some_and(|content_type| content_type.type_() == mime::MULTIPART)
    }

    /// Reads the whole body into fields and files.
    ///
    /// On failure everything spilled so far is deleted before the error is returned.
    pub async fn resolve(&self, req: &Request) -> Result<MultipartRequest, DispatchError> {
        let boundary = content_type(req)
            .and_then(|content_type| content_type.get_param(mime::BOUNDARY).map(|boundary| boundary.as_str().to_string()))
            .ok_or_else(|| DispatchError::multipart("missing multipart boundary"))?;

        if let Some(limit) = self.config.upload_limit()
            && let Some(length) = req.header_str(CONTENT_LENGTH).and_then(|length| length.parse::<u64>().ok())
            && length > limit
        {
            return Err(DispatchError::max_upload_size_exceeded(limit));
        }

        let mut multipart = MultipartRequest::default();
        match self.read_parts(req, &boundary, &mut multipart).await {
            Ok(()) => {
                debug!(fields = multipart.fields.len(), files = multipart.files.len(), "resolved multipart request");
                Ok(multipart)
            }
            Err(e) => {
                multipart.cleanup().await;
                Err(e)
            }
        }
    }

    /// Deletes the temporary files of a resolved request, returns how many were deleted.
    pub async fn cleanup(&self, multipart: &MultipartRequest) -> usize {
        multipart.cleanup().await
    }

    async fn read_parts(&self, req: &Request, boundary: &str, multipart: &mut MultipartRequest) -> Result<(), DispatchError> {
        let mut body = req.body().take().await.ok_or(DispatchError::BodyMissing)?;
        let mut decoder = MultipartDecoder::new(boundary);
        let mut buf = BytesMut::new();
        let mut read: u64 = 0;
        let mut eof = false;
        let mut current: Option<PartWriter> = None;

        loop {
            match decoder.decode(&mut buf)? {
                Some(PartItem::Headers(headers)) => current = Some(PartWriter::new(headers)),
                Some(PartItem::Chunk(bytes)) => {
                    let part = current.as_mut().ok_or_else(|| DispatchError::multipart("content outside of a part"))?;
                    part.write(bytes, &self.config).await?;
                }
                Some(PartItem::PartEnd) => {
                    if let Some(part) = current.take() {
                        part.finish(multipart).await?;
                    }
                }
                Some(PartItem::Eof) => return Ok(()),
                None if eof => return Err(DispatchError::multipart("unexpected end of multipart body")),
                None => match body.frame().await {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            read += data.len() as u64;
                            if let Some(limit) = self.config.upload_limit()
                                && read > limit
                            {
                                return Err(DispatchError::max_upload_size_exceeded(limit));
                            }
                            buf.extend_from_slice(&data);
                        }
                    }
                    Some(Err(e)) => return Err(DispatchError::multipart(format!("read body error: {e}"))),
                    None => eof = true,
                },
            }
        }
    }
}

fn content_type(req: &Request) -> Option<Mime> {
    req.header_str(CONTENT_TYPE).and_then(|value| value.parse::<Mime>().ok())
}

/// Accumulates one part while it is decoded.
struct PartWriter {
    headers: PartHeaders,
    size: u64,
    memory: BytesMut,
    spilled: Option<(NamedTempFile, tokio::fs::File)>,
}

impl PartWriter {
    fn new(headers: PartHeaders) -> Self {
        Self { headers, size: 0, memory: BytesMut::new(), spilled: None }
    }

    fn is_file(&self) -> bool {
        self.headers.filename.is_some()
    }

    async fn write(&mut self, bytes: Bytes, config: &MultipartConfig) -> Result<(), DispatchError> {
        self.size += bytes.len() as u64;
        if self.is_file()
            && let Some(limit) = config.file_limit()
            && self.size > limit
        {
            return Err(DispatchError::max_upload_size_exceeded(limit));
        }

        if let Some((_, file)) = &mut self.spilled {
            return file.write_all(&bytes).await.map_err(spill_error);
        }

        self.memory.extend_from_slice(&bytes);
        if self.is_file() && self.memory.len() > config.file_size_threshold {
            self.spill(config.temp_dir.as_deref()).await?;
        }
        Ok(())
    }

    async fn spill(&mut self, temp_dir: Option<&Path>) -> Result<(), DispatchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-");
        let temp = match temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(spill_error)?;

        let mut file = tokio::fs::File::from_std(temp.reopen().map_err(spill_error)?);
        file.write_all(&self.memory).await.map_err(spill_error)?;
        debug!(name = %self.headers.name, path = %temp.path().display(), "spill upload part to temp file");

        self.memory = BytesMut::new();
        self.spilled = Some((temp, file));
        Ok(())
    }

    async fn finish(self, multipart: &mut MultipartRequest) -> Result<(), DispatchError> {
        let PartHeaders { name, filename, content_type } = self.headers;
        let Some(filename) = filename else {
            let value = String::from_utf8(self.memory.to_vec())
                .map_err(|_| DispatchError::multipart(format!("field '{name}' is not valid utf-8")))?;
            multipart.fields.append(name, value);
            return Ok(());
        };

        let storage = match self.spilled {
            Some((temp, mut file)) => {
                file.flush().await.map_err(spill_error)?;
                Storage::Temp(temp)
            }
            None => Storage::Memory(self.memory.freeze()),
        };
        multipart.files.push(MultipartFile { name, filename, content_type, size: self.size, storage: Mutex::new(storage) });
        Ok(())
    }
}

fn spill_error(e: std::io::Error) -> DispatchError {
    DispatchError::multipart(format!("failed to buffer upload: {e}"))
}

/// The decoded content of a multipart request.
#[derive(Debug, Default)]
pub struct MultipartRequest {
    fields: ParamMap,
    files: Vec<MultipartFile>,
    cleaned: AtomicBool,
}

impl MultipartRequest {
    /// The text parts, by field name.
    pub fn fields(&self) -> &ParamMap {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }

    /// Returns the first file uploaded under `name`.
    pub fn file(&self, name: &str) -> Option<&MultipartFile> {
        self.files.iter().find(|file| file.name == name)
    }

    pub fn files_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MultipartFile> + 'a {
        self.files.iter().filter(move |file| file.name == name)
    }

    pub fn files(&self) -> &[MultipartFile] {
        &self.files
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned.load(Ordering::Acquire)
    }

    /// Releases every file; only the first call does any work.
    pub(crate) async fn cleanup(&self) -> usize {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let mut deleted = 0;
        for file in &self.files {
            if file.release().await {
                deleted += 1;
            }
        }
        debug!(deleted, "cleaned up multipart request");
        deleted
    }
}

#[derive(Debug)]
enum Storage {
    Memory(Bytes),
    Temp(NamedTempFile),
    Moved,
}

/// An uploaded file.
///
/// The content stays readable until the file is transferred or the request is cleaned up.
#[derive(Debug)]
pub struct MultipartFile {
    name: String,
    filename: String,
    content_type: Option<String>,
    size: u64,
    storage: Mutex<Storage>,
}

impl MultipartFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client-side file name, possibly empty.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn is_in_memory(&self) -> bool {
        matches!(*self.storage.lock().await, Storage::Memory(_))
    }

    pub async fn is_available(&self) -> bool {
        !matches!(*self.storage.lock().await, Storage::Moved)
    }

    pub async fn bytes(&self) -> Result<Bytes, DispatchError> {
        let storage = self.storage.lock().await;
        match &*storage {
            Storage::Memory(bytes) => Ok(bytes.clone()),
            Storage::Temp(temp) => tokio::fs::read(temp.path())
                .await
                .map(Bytes::from)
                .map_err(|e| DispatchError::server_internal(format!("failed to read upload '{}': {e}", self.name))),
            Storage::Moved => Err(self.moved_error()),
        }
    }

    /// Moves the content to `dest`. The file can not be read afterwards.
    pub async fn transfer_to(&self, dest: impl AsRef<Path>) -> Result<(), DispatchError> {
        let dest = dest.as_ref();
        let mut storage = self.storage.lock().await;

        match std::mem::replace(&mut *storage, Storage::Moved) {
            Storage::Memory(bytes) => {
                if let Err(e) = tokio::fs::write(dest, &bytes).await {
                    *storage = Storage::Memory(bytes);
                    return Err(self.transfer_error(dest, &e));
                }
            }
            Storage::Temp(temp) => match temp.persist(dest) {
                Ok(_) => {}
                // rename across file systems fails, copy instead
                Err(persist) => {
                    if let Err(e) = tokio::fs::copy(persist.file.path(), dest).await {
                        *storage = Storage::Temp(persist.file);
                        return Err(self.transfer_error(dest, &e));
                    }
                }
            },
            Storage::Moved => return Err(self.moved_error()),
        }
        debug!(name = %self.name, dest = %dest.display(), "transferred upload");
        Ok(())
    }

    /// Drops the content, returns whether a temp file was deleted.
    async fn release(&self) -> bool {
        let mut storage = self.storage.lock().await;
        match std::mem::replace(&mut *storage, Storage::Moved) {
            Storage::Temp(temp) => {
                let path = temp.path().to_path_buf();
                if let Err(e) = temp.close() {
                    warn!(path = %path.display(), cause = %e, "failed to delete upload temp file");
                }
                true
            }
            Storage::Memory(_) | Storage::Moved => false,
        }
    }

    fn moved_error(&self) -> DispatchError {
        DispatchError::server_internal(format!("upload '{}' has already been moved", self.name))
    }

    fn transfer_error(&self, dest: &Path, e: &std::io::Error) -> DispatchError {
        DispatchError::server_internal(format!("failed to transfer upload '{}' to {}: {e}", self.name, dest.display()))
    }
}
