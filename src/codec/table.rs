//! Columnar channel: Arrow IPC file format (Feather v2).

use std::io::Cursor;

use arrow_array::RecordBatch;
use arrow_ipc::reader::FileReader;
use arrow_ipc::writer::FileWriter;

use crate::{AppError, Result};

/// Media type used when sending tables.
pub const ARROW_FILE_MEDIA_TYPE: &str = "application/vnd.apache.arrow.file";

/// Media types accepted for tables in responses.
pub const MEDIA_TYPES: &[&str] = &[ARROW_FILE_MEDIA_TYPE, "application/x-feather"];

/// Serialize `batch` as a complete Arrow IPC file.
///
/// # Errors
///
/// Returns `AppError::Codec` if the writer rejects the batch.
pub fn encode_table(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut writer = FileWriter::try_new(&mut buffer, &batch.schema())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(buffer)
}

/// Read an Arrow IPC file into one batch, concatenating if it holds several.
///
/// # Errors
///
/// Returns `AppError::Codec` if `bytes` is not a valid Arrow IPC file.
pub fn decode_table(bytes: &[u8]) -> Result<RecordBatch> {
    let reader = FileReader::try_new(Cursor::new(bytes), None)?;
    let schema = reader.schema();
    let mut batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;

    match batches.len() {
        0 => Ok(RecordBatch::new_empty(schema)),
        1 => batches
            .pop()
            .ok_or_else(|| AppError::Codec("arrow file lost its only batch".into())),
        _ => Ok(arrow_select::concat::concat_batches(&schema, &batches)?),
    }
}
