/// Writes a frame body into `buf`.
///
/// Implementors may return a trailing slice that is written right after `buf`
/// without being copied into it.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
