//! Output sink selection: the orchestrator drives either the log-stream
//! shipper or the chunked object writer through one surface.

use crate::shipper::chunked::{ChunkError, ChunkWriter, ChunkedObjectWriter};
use crate::shipper::{LogShipper, ShipperError, ShipperWriter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Shipper(#[from] ShipperError),

    #[error(transparent)]
    Chunks(#[from] ChunkError),
}

pub enum OutputSink {
    Stream(LogShipper),
    Chunks(ChunkedObjectWriter),
}

#[derive(Clone)]
pub enum OutputWriter {
    Stream(ShipperWriter),
    Chunks(ChunkWriter),
}

impl OutputWriter {
    pub fn write(&self, bytes: &[u8]) {
        match self {
            OutputWriter::Stream(writer) => writer.write(bytes),
            OutputWriter::Chunks(writer) => writer.write(bytes),
        }
    }
}

impl OutputSink {
    pub async fn start(&mut self) -> Result<(), SinkError> {
        match self {
            OutputSink::Stream(shipper) => shipper.start().await?,
            OutputSink::Chunks(writer) => writer.start(),
        }
        Ok(())
    }

    pub fn writer(&self) -> OutputWriter {
        match self {
            OutputSink::Stream(shipper) => OutputWriter::Stream(shipper.writer()),
            OutputSink::Chunks(writer) => OutputWriter::Chunks(writer.writer()),
        }
    }

    /// Blocks until all buffered output has been durably accepted.
    pub async fn close(self) -> Result<(), SinkError> {
        match self {
            OutputSink::Stream(shipper) => shipper.close().await?,
            OutputSink::Chunks(writer) => writer.close().await?,
        }
        Ok(())
    }
}
