/// Splits a byte stream into `\n` terminated command lines.
///
/// Bytes after the last newline stay buffered until the next [`push`].
///
/// [`push`]: LineReader::push
#[derive(Debug, Default)]
pub struct LineReader {
  buf: Vec<u8>,
}

impl LineReader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, data: &[u8]) {
    self.buf.extend_from_slice(data);
  }

  /// Removes the next complete line, without its `\n` and an optional `\r`.
  pub fn next_line(&mut self) -> Option<String> {
    let pos = self.buf.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
      line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
  }

  pub fn lines(&mut self) -> Lines<'_> {
    Lines { reader: self }
  }

  /// Drains whatever has not been consumed as a line yet.
  pub fn take_remaining(&mut self) -> Vec<u8> {
    std::mem::take(&mut self.buf)
  }

  pub fn pending(&self) -> usize {
    self.buf.len()
  }
}

pub struct Lines<'a> {
  reader: &'a mut LineReader,
}

impl<'a> Iterator for Lines<'a> {
  type Item = String;

  fn next(&mut self) -> Option<String> {
    self.reader.next_line()
  }
}
