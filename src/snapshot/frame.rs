use std::{
    io::{self, Read, Write},
    marker::PhantomData,
};

use crate::encoding::{Decode, Encode, KeyReader, KeyWriter};

use super::SnapshotError;

// A single record never comes close to this; anything larger is corruption.
const MAX_FRAME_LEN: u32 = 1 << 16;

pub(crate) type Magic = [u8; 8];

pub(crate) fn write_frames<W, E>(mut w: W, magic: &Magic, records: &[E]) -> io::Result<()>
where
    W: Write,
    E: Encode,
{
    w.write_all(magic)?;
    w.write_all(&(records.len() as u64).to_le_bytes())?;
    let mut kw = KeyWriter::new();
    for record in records {
        kw.clear();
        record.write_bytes(&mut kw);
        w.write_all(&(kw.buf.len() as u32).to_le_bytes())?;
        w.write_all(&kw.buf)?;
    }
    w.flush()
}

fn read_header<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> Result<(), SnapshotError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SnapshotError::malformed(format!("truncated {}", what)),
        _ => SnapshotError::Io(e),
    })
}

/// Yields the records of a framed stream, failing on the first bad frame.
pub(crate) struct FrameReader<R, E>
where
    R: Read,
    E: Decode,
{
    r: R,
    remaining: u64,
    reader: KeyReader,
    _marker: PhantomData<E>,
}

impl<R, E> FrameReader<R, E>
where
    R: Read,
    E: Decode,
{
    pub(crate) fn new(mut r: R, magic: &Magic) -> Result<Self, SnapshotError> {
        let mut found = [0_u8; 8];
        read_header(&mut r, &mut found, "header")?;
        if found != *magic {
            return Err(SnapshotError::malformed(format!(
                "bad magic {:?}, expected {:?}",
                String::from_utf8_lossy(&found),
                String::from_utf8_lossy(magic)
            )));
        }
        let mut count = [0_u8; 8];
        read_header(&mut r, &mut count, "header")?;
        Ok(Self {
            r,
            remaining: u64::from_le_bytes(count),
            reader: KeyReader::new(),
            _marker: PhantomData,
        })
    }

    fn read_frame(&mut self) -> Result<E, SnapshotError> {
        let mut len = [0_u8; 4];
        read_header(&mut self.r, &mut len, "frame length")?;
        let data_len = u32::from_le_bytes(len);
        if data_len > MAX_FRAME_LEN {
            return Err(SnapshotError::malformed(format!(
                "frame of {} bytes exceeds the {} byte limit",
                data_len, MAX_FRAME_LEN
            )));
        }

        let buf = self.reader.buf_mut();
        buf.clear();
        buf.resize(data_len as usize, 0);
        read_header(&mut self.r, buf, "frame")?;

        let record = E::decode(&mut self.reader).map_err(SnapshotError::malformed)?;
        self.reader.finish().map_err(SnapshotError::malformed)?;
        Ok(record)
    }

    /// Reads every remaining record, then checks the stream ends there.
    pub(crate) fn read_all(mut self) -> Result<Vec<E>, SnapshotError> {
        let mut records = Vec::new();
        for record in &mut self {
            records.push(record?);
        }
        let mut probe = [0_u8; 1];
        loop {
            match self.r.read(&mut probe) {
                Ok(0) => return Ok(records),
                Ok(_) => return Err(SnapshotError::malformed("trailing bytes after last frame")),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SnapshotError::Io(e)),
            }
        }
    }
}

impl<R, E> Iterator for FrameReader<R, E>
where
    R: Read,
    E: Decode,
{
    type Item = Result<E, SnapshotError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.read_frame() {
            Ok(record) => {
                self.remaining -= 1;
                Some(Ok(record))
            }
            Err(e) => {
                // Stop after the first failure.
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
