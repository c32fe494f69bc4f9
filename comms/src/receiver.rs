use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{DEFAULT_MAX_MSG_SIZE, Deserialize, LEN_TYPE_SIZE, LenType};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_msg_size: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
        }
    }

    /// Sets the largest frame this receiver will accept.
    ///
    /// # Arguments
    /// * `max_msg_size` - The maximum size of a frame body in bytes.
    pub fn with_max_msg_size(mut self, max_msg_size: usize) -> Self {
        self.max_msg_size = max_msg_size;
        self
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// # Arguments
    /// * `buf` - The buffer to use for deserialization, the returned
    ///           `T`'s lifetimes will be tied to this buffer.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    /// A peer that closed the stream before a frame's length yields
    /// `UnexpectedEof`, one that closed it within a frame's body `InvalidData`.
    pub async fn recv_into<'buf, T>(&mut self, buf: &'buf mut Vec<u8>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
    {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;
        let len = LenType::from_be_bytes(size_buf) as usize;

        if len > self.max_msg_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "incoming frame of {len} bytes exceeds the limit of {} bytes",
                    self.max_msg_size
                ),
            ));
        }

        buf.resize(len, 0);
        self.rx.read_exact(buf).await.map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream closed in the middle of a {len} bytes frame"),
            ),
            _ => e,
        })?;

        T::deserialize(buf)
    }
}
