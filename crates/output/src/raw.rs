// Copyright 2025-2026 CEMAXECUTER LLC

//! Headerless dump: interleaved little-endian i16 I/Q.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use iq_sdr::dump::DumpSink;

pub struct RawDump<W: Write> {
    writer: W,
}

impl RawDump<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> RawDump<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> DumpSink for RawDump<W> {
    fn write(&mut self, batch: &[i16]) -> io::Result<()> {
        for &v in batch {
            self.writer.write_i16::<LittleEndian>(v)?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush()
    }
}
