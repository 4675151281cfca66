use std::io;

/// Ends an encoding stream, writing any trailer, and returns the inner writer.
pub trait Finish<W> {
    fn finish(self) -> io::Result<W>;
}
