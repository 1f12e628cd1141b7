// Records are encoded as a flat sequence of fields. Each field is written
// raw, with every 0x00 byte escaped to 0x00 0xff, and consecutive fields are
// joined by the separator 0x00 0x01. Nested tuples flatten, so
// `(a, (b, c))` writes three fields.

use anyhow::bail;

const SEPARATOR: [u8; 2] = [0x00, 0x01];
const ESCAPED_00: [u8; 2] = [0x00, 0xff];

fn copy_escaped(mut from: &[u8], to: &mut Vec<u8>) {
    while let Some(idx) = from.iter().position(|x| *x == 0x00) {
        to.extend(&from[..idx + 1]);
        to.push(0xff);
        from = &from[(idx + 1)..];
    }
    to.extend(from);
}

fn copy_unescaped(mut from: &[u8], to: &mut Vec<u8>) {
    while let Some(idx) = from.windows(2).position(|w| w == ESCAPED_00) {
        to.extend(&from[..idx + 1]);
        from = &from[(idx + 2)..];
    }
    to.extend(from);
}

#[derive(Debug, Default)]
pub struct KeyWriter {
    pub(crate) buf: Vec<u8>,
}

impl KeyWriter {
    pub fn new() -> Self {
        KeyWriter { buf: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.buf.clear()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn write(&mut self, buf: &[u8]) {
        copy_escaped(buf, &mut self.buf);
    }

    fn separator(&mut self) {
        self.buf.extend(SEPARATOR);
    }
}

#[derive(Debug, Default)]
pub struct KeyReader {
    buf: Vec<u8>,
    from: usize,
    scratch: Vec<u8>,
}

impl KeyReader {
    pub fn new() -> Self {
        KeyReader {
            buf: Vec::new(),
            from: 0,
            scratch: Vec::new(),
        }
    }

    /// Hands out the raw buffer for the next record to be read into.
    pub fn buf_mut(&mut self) -> &mut Vec<u8> {
        self.scratch.clear();
        self.from = 0;
        &mut self.buf
    }

    pub fn load(&mut self, buf: &[u8]) {
        let raw = self.buf_mut();
        raw.clear();
        raw.extend(buf);
    }

    /// Returns the next unescaped field of the loaded record.
    pub fn next(&mut self) -> anyhow::Result<&[u8]> {
        if self.exhausted() {
            bail!("record ended before all fields were read");
        }
        let rest = &self.buf[self.from..];
        let split_position = rest
            .windows(2)
            .position(|x| x == SEPARATOR)
            .unwrap_or(rest.len());

        self.scratch.clear();
        copy_unescaped(&rest[..split_position], &mut self.scratch);
        self.from += split_position + 2;

        Ok(&self.scratch)
    }

    fn exhausted(&self) -> bool {
        self.from > self.buf.len()
    }

    /// Fails if the record has fields left over.
    pub fn finish(&self) -> anyhow::Result<()> {
        if !self.exhausted() {
            bail!("record has trailing fields");
        }
        Ok(())
    }
}

pub trait Encode: std::fmt::Debug {
    fn write_bytes(&self, kw: &mut KeyWriter);
}

pub trait Decode: Sized {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self>;
}

macro_rules! le_int_codec {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn write_bytes(&self, kw: &mut KeyWriter) {
                    kw.write(&self.to_le_bytes())
                }
            }

            impl Decode for $t {
                fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
                    let field = kr.next()?;
                    match field.try_into() {
                        Ok(bytes) => Ok(Self::from_le_bytes(bytes)),
                        Err(_) => bail!(
                            "expected a {}-byte {} field, got {} bytes",
                            std::mem::size_of::<$t>(),
                            stringify!($t),
                            field.len()
                        ),
                    }
                }
            }
        )*
    };
}

le_int_codec!(i16, i32, i64);

impl<A> Encode for &A
where
    A: Encode,
{
    fn write_bytes(&self, kw: &mut KeyWriter) {
        (*self).write_bytes(kw)
    }
}

impl<A, B> Encode for (A, B)
where
    A: Encode,
    B: Encode,
{
    fn write_bytes(&self, kw: &mut KeyWriter) {
        self.0.write_bytes(kw);
        kw.separator();
        self.1.write_bytes(kw);
    }
}

impl<A, B> Decode for (A, B)
where
    A: Decode,
    B: Decode,
{
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let a = A::decode(kr)?;
        let b = B::decode(kr)?;
        Ok((a, b))
    }
}
