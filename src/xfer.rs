//! File-transfer framing on top of the byte stream.
//!
//! A session opens with a request header of
//! `[mode:4 BE][name_len:4 BE][name bytes]`, then the file travels as
//! `[len:4 BE][len bytes]`. A download of a missing file is answered with
//! the signed length sentinel [`FILE_NOT_FOUND`] instead.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Endpoint, Error};

/// Server-to-client length sentinel: the requested file does not exist.
pub const FILE_NOT_FOUND: i32 = -1;

/// What the client intends to do with the named file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Upload = 1,
    Download = 2,
}

impl ClientMode {
    fn from_u32(value: u32) -> Result<ClientMode, Error> {
        match value {
            1 => Ok(ClientMode::Upload),
            2 => Ok(ClientMode::Download),
            other => Err(Error::InvalidMode(other)),
        }
    }
}

/// Announces the transfer to the server.
pub fn send_request(endpoint: &mut Endpoint, mode: ClientMode, name: &str) -> Result<(), Error> {
    endpoint.send_all(&(mode as u32).to_be_bytes())?;
    endpoint.send_all(&(name.len() as u32).to_be_bytes())?;
    endpoint.send_all(name.as_bytes())?;
    Ok(())
}

/// Reads the client's transfer announcement.
pub fn recv_request(endpoint: &mut Endpoint) -> Result<(ClientMode, String), Error> {
    let mode = ClientMode::from_u32(recv_u32(endpoint)?)?;
    let name_len = recv_u32(endpoint)? as usize;
    let name_bytes = endpoint.recv(name_len)?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();

    debug!(?mode, %name, "transfer request received");
    Ok((mode, name))
}

/// Streams `path` to the peer, length first.
pub fn send_file(endpoint: &mut Endpoint, path: &Path) -> Result<(), Error> {
    let data = fs::read(path)?;
    debug!(len = data.len(), path = %path.display(), "sending file");

    endpoint.send_all(&(data.len() as i32).to_be_bytes())?;
    endpoint.send_all(&data)?;
    Ok(())
}

/// Answers a download of a file the server does not have.
pub fn send_not_found(endpoint: &mut Endpoint) -> Result<(), Error> {
    endpoint.send_all(&FILE_NOT_FOUND.to_be_bytes())
}

/// Receives a file into `dst` (joined with `name` when `dst` is a
/// directory) and returns where it was written.
pub fn recv_file(endpoint: &mut Endpoint, dst: &Path, name: &str) -> Result<PathBuf, Error> {
    let len = recv_u32(endpoint)? as i32;
    if len == FILE_NOT_FOUND {
        return Err(Error::FileNotFound(name.to_owned()));
    }

    let data = endpoint.recv(len as usize)?;
    let path = if dst.is_dir() {
        dst.join(name)
    } else {
        dst.to_path_buf()
    };
    fs::write(&path, &data)?;

    debug!(len = data.len(), path = %path.display(), "file received");
    Ok(path)
}

fn recv_u32(endpoint: &mut Endpoint) -> Result<u32, Error> {
    let bytes = endpoint.recv(4)?;
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes);
    Ok(u32::from_be_bytes(word))
}
