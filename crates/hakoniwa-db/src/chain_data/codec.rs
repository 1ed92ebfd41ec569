//! どこで: chain_data共通codec補助 / 何を: Bound防波堤とログcodec / なぜ: 破損時の扱いを統一するため

use crate::decode::{read_array, read_u32, read_vec};
use alloy_primitives::{Address, Bytes, Log, LogData, B256};
use std::borrow::Cow;
use std::cell::Cell;

use super::constants::{MAX_LOG_DATA, MAX_LOG_TOPICS};

thread_local! {
    static DECODE_FAILURES: Cell<u64> = const { Cell::new(0) };
}

pub fn encode_guarded<'a>(label: &'static str, bytes: Vec<u8>, max_size: u32) -> Cow<'a, [u8]> {
    ensure_encoded_within_bound(label, bytes.len(), max_size);
    Cow::Owned(bytes)
}

pub fn ensure_encoded_within_bound(label: &'static str, encoded_len: usize, max_size: u32) {
    if encoded_len > max_size as usize {
        tracing::error!(label, encoded_len, max_size, "storable encode exceeds bound");
        panic!("storable.encode.bound_exceeded label={label}");
    }
}

pub fn mark_decode_failure(label: &'static str) {
    DECODE_FAILURES.with(|count| count.set(count.get().saturating_add(1)));
    tracing::warn!(label, "storable decode failed, substituting fallback value");
}

pub fn decode_failure_count() -> u64 {
    DECODE_FAILURES.with(|count| count.get())
}

pub(crate) fn encode_log(out: &mut Vec<u8>, log: &Log) {
    out.extend_from_slice(log.address.as_slice());
    let topics = log.data.topics();
    let topics_len = u32::try_from(topics.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&topics_len.to_be_bytes());
    for topic in topics.iter() {
        out.extend_from_slice(topic.as_slice());
    }
    let data = log.data.data.as_ref();
    let data_len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&data_len.to_be_bytes());
    out.extend_from_slice(data);
}

pub(crate) fn decode_log(data: &[u8], offset: &mut usize) -> Option<Log> {
    let address = read_array::<20>(data, offset)?;
    let topics_len = read_u32(data, offset)?;
    if topics_len as usize > MAX_LOG_TOPICS {
        return None;
    }
    let mut topics = Vec::with_capacity(topics_len as usize);
    for _ in 0..topics_len {
        let topic = read_array::<32>(data, offset)?;
        topics.push(B256::from(topic));
    }
    let payload_len = read_u32(data, offset)?;
    if payload_len as usize > MAX_LOG_DATA {
        return None;
    }
    let payload = read_vec(data, offset, payload_len as usize)?;
    let log_data = LogData::new(topics, Bytes::from(payload))?;
    Some(Log {
        address: Address::from(address),
        data: log_data,
    })
}
