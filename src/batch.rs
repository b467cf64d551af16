use prost::Message;

use crate::connector_proto::{
    update_response::Response, LogEntry, LogLevel, Record, Records, UpdateResponse,
};

/// Hard protocol limit on records per wire batch.
pub const MAX_BATCH_RECORDS: usize = 100;
/// Hard protocol limit on the serialized size of a wire batch (100 KiB).
pub const MAX_BATCH_SIZE_BYTES: usize = 100 * 1024;

/// Groups a lazily produced record sequence into size-bounded wire batches.
///
/// A candidate record joins the open batch only while both caps hold: the
/// record count cap and the exact serialized byte size of the would-be
/// `Records` message. When a candidate does not fit, the open batch is
/// flushed first; a record that exceeds the byte cap even on its own can
/// never be batched and is passed through as a standalone message with a
/// warning. Emission order always matches the input order.
pub struct BatchAccumulator {
    batch: Vec<Record>,
    batch_bytes: usize,
    max_records: usize,
    max_bytes: usize,
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::with_limits(MAX_BATCH_RECORDS, MAX_BATCH_SIZE_BYTES)
    }

    pub fn with_limits(max_records: usize, max_bytes: usize) -> Self {
        Self {
            batch: Vec::new(),
            batch_bytes: 0,
            max_records,
            max_bytes,
        }
    }

    /// Offer one record; returns the wire messages released by it, if any.
    pub fn offer(&mut self, record: Record) -> Vec<UpdateResponse> {
        let mut out = Vec::new();
        let framed = framed_len(&record);

        if self.batch.len() + 1 <= self.max_records && self.batch_bytes + framed <= self.max_bytes
        {
            self.batch.push(record);
            self.batch_bytes += framed;
            return out;
        }

        if let Some(flushed) = self.flush() {
            out.push(flushed);
        }

        if framed > self.max_bytes {
            tracing::warn!(
                table = %record.table_name,
                bytes = framed,
                cap = self.max_bytes,
                "record exceeds batch size cap, emitting individually"
            );
            out.push(log_entry(
                LogLevel::Warning,
                format!(
                    "record for table {} exceeds the {} byte batch cap, emitting individually",
                    record.table_name, self.max_bytes
                ),
            ));
            out.push(UpdateResponse {
                response: Some(Response::Record(record)),
            });
        } else {
            self.batch.push(record);
            self.batch_bytes += framed;
        }
        out
    }

    /// Flush any leftover batch at end of input.
    pub fn finish(&mut self) -> Option<UpdateResponse> {
        self.flush()
    }

    fn flush(&mut self) -> Option<UpdateResponse> {
        if self.batch.is_empty() {
            return None;
        }
        let records = std::mem::take(&mut self.batch);
        self.batch_bytes = 0;
        Some(UpdateResponse {
            response: Some(Response::Records(Records { records })),
        })
    }
}

/// Exact wire cost of one record inside a `Records` message: field-1 key,
/// length prefix, payload. Summing this over the batch equals the serialized
/// size of the whole `Records` message, which is what downstream size limits
/// are enforced against.
fn framed_len(record: &Record) -> usize {
    let len = record.encoded_len();
    1 + prost::encoding::encoded_len_varint(len as u64) + len
}

fn log_entry(level: LogLevel, message: String) -> UpdateResponse {
    UpdateResponse {
        response: Some(Response::LogEntry(LogEntry {
            level: level as i32,
            message,
        })),
    }
}
