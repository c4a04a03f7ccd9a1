//! SFTP subsystem: maps SFTP requests onto the file bridge using the
//! `/{DRIVE}[.{USER}]/{NAME.EXT}` path grammar (design §6).

use crate::access_log::{AccessLog, Kind};
use crate::bridge::{default_timeout, BridgeRequest, RequestType};
use crate::context::Context;
use async_trait::async_trait;
use russh::{Channel, Msg};
use russh_sftp::protocol::{Attrs, File, FileAttributes, Name, Status, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Drive one SFTP subsystem channel to completion against a fresh
/// `SftpHandler`. Runs until the client closes the channel.
pub async fn serve(context: Arc<Context>, access_log: Arc<AccessLog>, peer: String, channel: Channel<Msg>) {
    let handler = SftpHandler::new(context, access_log, peer);
    let stream = channel.into_stream();
    if let Err(err) = russh_sftp::server::run(stream, handler).await {
        warn!(error = %err, "sftp session ended with an error");
    }
}

fn encode_8_3_name(name: &str) -> [u8; 11] {
    let mut buf = [b' '; 11];
    let upper = name.to_ascii_uppercase();
    let (stem, ext) = upper.split_once('.').unwrap_or((upper.as_str(), ""));
    for (i, b) in stem.bytes().take(8).enumerate() {
        buf[i] = b;
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        buf[8 + i] = b;
    }
    buf
}

pub struct SftpHandler {
    context: Arc<Context>,
    access_log: Arc<AccessLog>,
    peer: String,
    next_handle: AtomicU32,
    open_files: HashMap<String, (char, u8, String)>,
    /// Directory handles awaiting their one `readdir` batch (design §4.9:
    /// one bridge round trip per directory, no incremental paging) — once
    /// drained the handle maps to `true` and the next call returns EOF.
    open_dirs: HashMap<String, (char, u8, bool)>,
}

impl SftpHandler {
    pub fn new(context: Arc<Context>, access_log: Arc<AccessLog>, peer: String) -> Self {
        SftpHandler {
            context,
            access_log,
            peer,
            next_handle: AtomicU32::new(1),
            open_files: HashMap::new(),
            open_dirs: HashMap::new(),
        }
    }

    fn submit(&self, kind: RequestType, drive: char, user: u8, name: &str, offset: u32, length: u16, data: Vec<u8>) -> Result<crate::bridge::BridgeReply, StatusCode> {
        let request = BridgeRequest {
            id: 0,
            kind,
            drive: drive as u8,
            user,
            flags: 0,
            name: encode_8_3_name(name),
            offset,
            length,
            data,
        };
        self.context
            .bridge
            .submit(request, default_timeout())
            .map_err(|_| StatusCode::Failure)
    }
}

#[async_trait]
impl russh_sftp::server::Handler for SftpHandler {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        _pflags: russh_sftp::protocol::OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<File, Self::Error> {
        let (drive, user, name) = super::parse_bridge_path(&filename).ok_or(StatusCode::NoSuchFile)?;
        let name = name.unwrap_or_default();
        self.submit(RequestType::Open, drive, user, &name, 0, 0, Vec::new())?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed).to_string();
        self.open_files.insert(handle.clone(), (drive, user, name));
        self.access_log.record(Kind::Sftp, &self.peer, &format!("open {filename}"));
        Ok(File { id, handle, attrs: FileAttributes::default() })
    }

    async fn read(&mut self, id: u32, handle: String, offset: u64, len: u32) -> Result<russh_sftp::protocol::Data, Self::Error> {
        let (drive, user, name) = self.open_files.get(&handle).cloned().ok_or(StatusCode::Failure)?;
        let reply = self.submit(RequestType::Read, drive, user, &name, offset as u32, len.min(u16::MAX as u32) as u16, Vec::new())?;
        if reply.data.is_empty() {
            return Err(StatusCode::Eof);
        }
        Ok(russh_sftp::protocol::Data { id, data: reply.data })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        if let Some((drive, user, name)) = self.open_files.remove(&handle) {
            let _ = self.submit(RequestType::Close, drive, user, &name, 0, 0, Vec::new());
        }
        Ok(Status { id, status_code: StatusCode::Ok, error_message: String::new(), language_tag: String::new() })
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        Ok(Name { id, files: vec![File { id, handle: path, attrs: FileAttributes::default() }] })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let (drive, user, name) = super::parse_bridge_path(&path).ok_or(StatusCode::NoSuchFile)?;
        self.submit(RequestType::Stat, drive, user, &name.unwrap_or_default(), 0, 0, Vec::new())?;
        Ok(Attrs { id, attrs: FileAttributes::default() })
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<File, Self::Error> {
        let (drive, user, _) = super::parse_bridge_path(&path).ok_or(StatusCode::NoSuchFile)?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed).to_string();
        self.open_dirs.insert(handle.clone(), (drive, user, false));
        self.access_log.record(Kind::Sftp, &self.peer, &format!("opendir {path}"));
        Ok(File { id, handle, attrs: FileAttributes::default() })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let (drive, user, served) = *self.open_dirs.get(&handle).ok_or(StatusCode::Failure)?;
        if served {
            return Err(StatusCode::Eof);
        }
        let reply = self.submit(RequestType::Directory, drive, user, "", 0, 0, Vec::new())?;
        self.open_dirs.insert(handle, (drive, user, true));
        let files = reply
            .data
            .chunks_exact(11)
            .map(|entry| {
                let name = String::from_utf8_lossy(entry).trim().to_string();
                File { id, handle: name, attrs: FileAttributes::default() }
            })
            .collect();
        Ok(Name { id, files })
    }

    async fn write(&mut self, id: u32, handle: String, offset: u64, data: Vec<u8>) -> Result<Status, Self::Error> {
        let (drive, user, name) = self.open_files.get(&handle).cloned().ok_or(StatusCode::Failure)?;
        let len = data.len().min(u16::MAX as usize) as u16;
        self.submit(RequestType::Write, drive, user, &name, offset as u32, len, data)?;
        Ok(Status { id, status_code: StatusCode::Ok, error_message: String::new(), language_tag: String::new() })
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        let (drive, user, name) = super::parse_bridge_path(&filename).ok_or(StatusCode::NoSuchFile)?;
        self.submit(RequestType::Remove, drive, user, &name.unwrap_or_default(), 0, 0, Vec::new())?;
        self.access_log.record(Kind::Sftp, &self.peer, &format!("remove {filename}"));
        Ok(Status { id, status_code: StatusCode::Ok, error_message: String::new(), language_tag: String::new() })
    }
}
