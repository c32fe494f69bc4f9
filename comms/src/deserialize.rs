use std::io;

/// Reads a frame body, the returned value may borrow from `buf`.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
