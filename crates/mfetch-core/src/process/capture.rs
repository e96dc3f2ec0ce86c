//! Bounded output capture so a chatty tool cannot grow memory without limit.
//! Excess bytes are read and dropped so the child never blocks on a full pipe.

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Keeps the first `limit` bytes written to it.
#[derive(Debug)]
pub struct HeadBuffer {
    buf: Vec<u8>,
    limit: usize,
    dropped: u64,
}

impl HeadBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        let take = room.min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        self.dropped += (data.len() - take) as u64;
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Keeps the last `limit` bytes written to it.
#[derive(Debug)]
pub struct TailBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl TailBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.limit {
            self.buf.clear();
            self.buf
                .extend_from_slice(&data[data.len() - self.limit..]);
            return;
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.drain(..excess);
        }
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

pub(super) async fn read_head<R>(reader: Option<R>, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut head = HeadBuffer::new(limit);
    if let Some(mut reader) = reader {
        let mut chunk = vec![0u8; READ_CHUNK];
        while let Ok(n) = reader.read(&mut chunk).await {
            if n == 0 {
                break;
            }
            head.push(&chunk[..n]);
        }
    }
    if head.dropped() > 0 {
        tracing::debug!(dropped = head.dropped(), "stdout exceeded capture limit");
    }
    head.into_string()
}

pub(super) async fn read_tail<R>(reader: Option<R>, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = TailBuffer::new(limit);
    if let Some(mut reader) = reader {
        let mut chunk = vec![0u8; READ_CHUNK];
        while let Ok(n) = reader.read(&mut chunk).await {
            if n == 0 {
                break;
            }
            tail.push(&chunk[..n]);
        }
    }
    tail.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_buffer_keeps_prefix() {
        let mut h = HeadBuffer::new(5);
        h.push(b"abc");
        h.push(b"defgh");
        assert_eq!(h.dropped(), 3);
        assert_eq!(h.into_string(), "abcde");
    }

    #[test]
    fn tail_buffer_keeps_suffix() {
        let mut t = TailBuffer::new(4);
        t.push(b"ab");
        t.push(b"cdef");
        assert_eq!(t.into_string(), "cdef");

        let mut t = TailBuffer::new(4);
        t.push(b"abc");
        t.push(b"de");
        assert_eq!(t.into_string(), "bcde");
    }

    #[tokio::test]
    async fn read_helpers_drain_reader() {
        let data: &[u8] = b"0123456789";
        assert_eq!(read_head(Some(data), 4).await, "0123");
        let data: &[u8] = b"0123456789";
        assert_eq!(read_tail(Some(data), 4).await, "6789");
        assert_eq!(read_head::<&[u8]>(None, 4).await, "");
    }
}
