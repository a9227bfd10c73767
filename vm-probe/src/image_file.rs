#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use vm::ImageReader;

/// 以主机文件充当可执行映像
///
/// `ImageReader` 只能报告读出的字节数，读取出错时错误留存于此，
/// 由调用者在读取不足时取出。
pub struct ImageFile {
    file: File,
    error: Option<io::Error>,
}

impl ImageFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }

    pub fn new(file: File) -> Self {
        Self { file, error: None }
    }

    pub fn size(&self) -> io::Result<usize> {
        Ok(self.file.metadata()?.len() as usize)
    }

    /// 取出最近一次读取的错误
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }
}

impl ImageReader for ImageFile {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> usize {
        let read = self
            .file
            .seek(SeekFrom::Start(offset as u64))
            .and_then(|_| read_full(&mut self.file, buf));

        match read {
            Ok(n) => n,
            Err(e) => {
                log::error!("image read at {offset:#x}: {e}");
                self.error = Some(e);
                0
            }
        }
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}
