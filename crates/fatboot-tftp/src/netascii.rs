//! The netascii transfer mode: a line-ending aware bijection between
//! host text and the wire form.
//!
//! On the wire, `CR LF` encodes a logical newline and `CR NUL` a
//! literal carriage return; everything else is ASCII passthrough. The
//! codec is stateful and incremental: on a host whose line separator is
//! `\r\n`, a chunk ending in a bare CR cannot be classified until the
//! next chunk (or the end of the stream) arrives, so both directions
//! carry `final` semantics: a trailing CR with `final` is a literal CR
//! on encode and an error on decode.

use std::io::{self, Read};

/// The host line separator, pinned at build time.
pub fn host_linesep() -> &'static [u8] {
    if cfg!(windows) { b"\r\n" } else { b"\n" }
}

/// Errors raised while decoding wire netascii.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NetasciiError {
    #[error("invalid byte following CR: {0:#04x}")]
    BadSequence(u8),

    #[error("stream ends with a bare CR")]
    TruncatedSequence,

    #[error("non-ASCII byte {0:#04x} in netascii stream")]
    NotAscii(u8),
}

/// Incremental host-to-wire encoder.
#[derive(Debug)]
pub struct Encoder {
    sep: &'static [u8],
    pending_cr: bool,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_linesep(host_linesep())
    }

    pub fn with_linesep(sep: &'static [u8]) -> Self {
        Self {
            sep,
            pending_cr: false,
        }
    }

    /// Encodes *input*, appending the wire form to *out*. With a `\r\n`
    /// separator a chunk's trailing CR is held back until the next call
    /// unless *final_* is set (a held CR is then a literal CR).
    pub fn push(&mut self, input: &[u8], final_: bool, out: &mut Vec<u8>) {
        let two_byte_sep = self.sep == b"\r\n";
        let mut i = 0;
        while i < input.len() {
            let byte = input[i];
            if self.pending_cr {
                // Classify the held CR now that its successor arrived
                self.pending_cr = false;
                if byte == b'\n' {
                    out.extend(b"\r\n");
                    i += 1;
                    continue;
                }
                out.extend(b"\r\0");
            }
            match byte {
                // The start of a separator, or a literal CR; the next
                // byte decides
                b'\r' if two_byte_sep => self.pending_cr = true,
                b'\r' => out.extend(b"\r\0"),
                b'\n' if !two_byte_sep => out.extend(b"\r\n"),
                other => out.push(other),
            }
            i += 1;
        }
        if final_ && self.pending_cr {
            out.extend(b"\r\0");
            self.pending_cr = false;
        }
    }
}

/// Incremental wire-to-host decoder.
#[derive(Debug)]
pub struct Decoder {
    sep: &'static [u8],
    pending_cr: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_linesep(host_linesep())
    }

    pub fn with_linesep(sep: &'static [u8]) -> Self {
        Self {
            sep,
            pending_cr: false,
        }
    }

    /// Decodes *input*, appending the host form to *out*. A trailing CR
    /// defers a decision unless *final_* is set, in which case it is an
    /// error.
    pub fn push(
        &mut self,
        input: &[u8],
        final_: bool,
        out: &mut Vec<u8>,
    ) -> Result<(), NetasciiError> {
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                match byte {
                    b'\n' => out.extend(self.sep),
                    0 => out.push(b'\r'),
                    other => return Err(NetasciiError::BadSequence(other)),
                }
            } else if byte == b'\r' {
                self.pending_cr = true;
            } else if byte.is_ascii() {
                out.push(byte);
            } else {
                return Err(NetasciiError::NotAscii(byte));
            }
        }
        if final_ && self.pending_cr {
            return Err(NetasciiError::TruncatedSequence);
        }
        Ok(())
    }
}

/// Adapts a byte stream into its netascii wire form for transfer.
///
/// The transcoded length is unknowable without reading the whole
/// stream, so a `Transcoder` is deliberately unseekable: `tsize`
/// negotiation fails for netascii transfers and the option is dropped.
pub struct Transcoder<R> {
    inner: R,
    encoder: Encoder,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> Transcoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            encoder: Encoder::new(),
            buf: Vec::new(),
            eof: false,
        }
    }
}

impl<R: Read> Read for Transcoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];
        while self.buf.len() < buf.len() && !self.eof {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
                self.encoder.push(&[], true, &mut self.buf);
            } else {
                self.encoder.push(&chunk[..n], false, &mut self.buf);
            }
        }
        let n = self.buf.len().min(buf.len());
        buf[..n].copy_from_slice(&self.buf[..n]);
        self.buf.drain(..n);
        Ok(n)
    }
}
