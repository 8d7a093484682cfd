/* Copyright (C) 2024 Philipp Benner
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use reqwest::blocking::{Client, Response};

/* -------------------------------------------------------------------------- */

// Read + Seek over either a local file or a remote HTTP resource. Remote
// seeking is implemented with HTTP Range requests, so only the requested
// slices of a file are ever transferred
#[derive(Debug)]
enum NetFileStream {
    File(File),
    Http(HttpSeekableReader),
}

#[derive(Debug)]
pub struct NetFile {
    stream: NetFileStream,
}

/* -------------------------------------------------------------------------- */

impl NetFile {

    fn open_file(filename: &str) -> io::Result<NetFile> {
        let path = Path::new(filename);

        if path.exists() && path.is_file() {
            let file = File::open(path)?;
            Ok(NetFile { stream: NetFileStream::File(file) })
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, format!("file `{}` not found", filename)))
        }
    }

    fn open_http(url: &str) -> io::Result<NetFile> {
        let client    = Client::new();
        let head_resp = client.head(url).send()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        if !head_resp.status().is_success() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "HTTP request failed"));
        }

        let content_length = head_resp
            .headers()
            .get("Content-Length")
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header"))?
            .to_str()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length header"))?
            .parse::<u64>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length header"))?;

        let http_reader = HttpSeekableReader::new(client, url.to_string(), content_length);

        Ok(NetFile { stream: NetFileStream::Http(http_reader) })
    }

    pub fn open(filename: &str) -> io::Result<NetFile> {
        if filename.starts_with("http://") || filename.starts_with("https://") {
            NetFile::open_http(filename)
        } else {
            NetFile::open_file(filename)
        }
    }
}

impl Read for NetFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            NetFileStream::File(file) => file.read(buf),
            NetFileStream::Http(file) => file.read(buf),
        }
    }
}

impl Seek for NetFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.stream {
            NetFileStream::File(file) => file.seek(pos),
            NetFileStream::Http(file) => file.seek(pos),
        }
    }
}

/* -------------------------------------------------------------------------- */

#[derive(Debug)]
struct HttpSeekableReader {
    client        : Client,
    url           : String,
    current_pos   : u64,
    content_length: u64,
}

/* -------------------------------------------------------------------------- */

impl HttpSeekableReader {

    fn new(client: Client, url: String, content_length: u64) -> Self {
        HttpSeekableReader {
            client,
            url,
            current_pos: 0,
            content_length,
        }
    }

    fn get_range(&self, range: Range<u64>) -> Result<Response, reqwest::Error> {
        let range_header = format!("bytes={}-{}", range.start, range.end - 1);
        self.client
            .get(&self.url)
            .header("Range", range_header)
            .send()
    }
}

impl Read for HttpSeekableReader {

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {

        // clamp the request to the resource size
        let range_end = (self.current_pos + buf.len() as u64).min(self.content_length);

        if range_end <= self.current_pos {
            return Ok(0);
        }

        let response = self
            .get_range(self.current_pos..range_end)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        if !response.status().is_success() {
            return Err(io::Error::new(io::ErrorKind::Other, "HTTP range request failed"));
        }

        let bytes      = response.bytes().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let bytes_read = bytes.len().min(buf.len());

        buf[..bytes_read].copy_from_slice(&bytes[..bytes_read]);
        self.current_pos += bytes_read as u64;

        Ok(bytes_read)
    }
}

impl Seek for HttpSeekableReader {

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(p) => {
                if p >= 0 {
                    self.current_pos + p as u64
                } else {
                    self.current_pos.saturating_sub((-p) as u64)
                }
            }
            SeekFrom::End(p) => {
                if p >= 0 {
                    self.content_length + p as u64
                } else {
                    self.content_length.saturating_sub((-p) as u64)
                }
            }
        };

        if new_pos > self.content_length {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek position beyond file size"));
        }

        self.current_pos = new_pos;

        Ok(new_pos)
    }
}
