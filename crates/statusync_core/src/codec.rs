/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Binary layout of a persisted subscription set.
//!
//! All integers are little-endian. Optional blocks are preceded by a one byte
//! presence flag, strings and sequences by a `u32` length.
//!
//! ```text
//! u8   format version
//! i64  account id
//! i32  chain id
//! i64  last saved (unix ms)
//! i64  last processed fan-of transaction id
//! u32  record count, then per record:
//!        i64 account id, [profile], [last viewed marker], [current marker]
//! [fan-of head]
//! ```

use crate::record::SubscriptionRecord;
use crate::subscription_set::SubscriptionSet;
use bytes::{Buf, BufMut, BytesMut};
use statusync_protocol::{ActivityMarker, FanOfHead, ProfileInfo};

pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("blob truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid presence flag {0}")]
    InvalidFlag(u8),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
}

/// Everything restored from one blob.
pub struct PersistedState {
    pub set: SubscriptionSet,
    pub fan_of_head: Option<FanOfHead>,
}

/// Serializes `set`, stamping it with `now_ms` as its save time.
pub fn encode(set: &mut SubscriptionSet, fan_of_head: Option<&FanOfHead>, now_ms: i64) -> Vec<u8> {
    set.set_last_saved_ms(now_ms);

    let records = set.records();
    let mut buf = BytesMut::with_capacity(32 + records.len() * 64);
    buf.put_u8(FORMAT_VERSION);
    buf.put_i64_le(set.account_id());
    buf.put_i32_le(set.chain_id());
    buf.put_i64_le(set.last_saved_ms());
    buf.put_i64_le(set.last_processed_transaction_id());

    buf.put_u32_le(records.len() as u32);
    for record in &records {
        put_record(&mut buf, record);
    }

    put_optional(&mut buf, fan_of_head, |buf, head| {
        buf.put_i64_le(head.transaction_id);
        buf.put_i64_le(head.timestamp);
    });

    buf.to_vec()
}

pub fn decode(bytes: &[u8]) -> Result<PersistedState, CodecError> {
    let mut buf = bytes;

    let version = get_u8(&mut buf)?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let account_id = get_i64(&mut buf)?;
    ensure(&buf, 4)?;
    let chain_id = buf.get_i32_le();
    let last_saved_ms = get_i64(&mut buf)?;
    let last_processed = get_i64(&mut buf)?;

    let count = get_u32(&mut buf)? as usize;
    // Each record takes at least 11 bytes; reject absurd counts before allocating.
    ensure(&buf, count.saturating_mul(11))?;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(get_record(&mut buf)?);
    }

    let fan_of_head = if buf.has_remaining() {
        get_optional(&mut buf, |buf| {
            Ok(FanOfHead {
                transaction_id: get_i64(buf)?,
                timestamp: get_i64(buf)?,
            })
        })?
    } else {
        None
    };

    Ok(PersistedState {
        set: SubscriptionSet::restore(account_id, chain_id, last_saved_ms, last_processed, records),
        fan_of_head,
    })
}

fn put_record(buf: &mut BytesMut, record: &SubscriptionRecord) {
    buf.put_i64_le(record.account_id);
    put_optional(buf, record.profile.as_ref(), put_profile);
    put_optional(buf, record.last_viewed.as_ref(), put_marker);
    put_optional(buf, record.current.as_ref(), put_marker);
}

fn get_record(buf: &mut &[u8]) -> Result<SubscriptionRecord, CodecError> {
    let account_id = get_i64(buf)?;
    Ok(SubscriptionRecord {
        account_id,
        profile: get_optional(buf, get_profile)?,
        last_viewed: get_optional(buf, get_marker)?,
        current: get_optional(buf, get_marker)?,
    })
}

fn put_marker(buf: &mut BytesMut, marker: &ActivityMarker) {
    buf.put_i64_le(marker.transaction_id);
    buf.put_i64_le(marker.timestamp);
    buf.put_i64_le(marker.count);
}

fn get_marker(buf: &mut &[u8]) -> Result<ActivityMarker, CodecError> {
    Ok(ActivityMarker {
        transaction_id: get_i64(buf)?,
        timestamp: get_i64(buf)?,
        count: get_i64(buf)?,
    })
}

fn put_profile(buf: &mut BytesMut, profile: &ProfileInfo) {
    buf.put_i64_le(profile.account_id);
    buf.put_i64_le(profile.profile_transaction_id);
    buf.put_i64_le(profile.image_transaction_id);
    put_str(buf, &profile.profile_name);
    put_str(buf, &profile.real_name);
    put_str(buf, &profile.bio);
}

fn get_profile(buf: &mut &[u8]) -> Result<ProfileInfo, CodecError> {
    Ok(ProfileInfo {
        account_id: get_i64(buf)?,
        profile_transaction_id: get_i64(buf)?,
        image_transaction_id: get_i64(buf)?,
        profile_name: get_str(buf)?,
        real_name: get_str(buf)?,
        bio: get_str(buf)?,
    })
}

fn put_optional<T>(buf: &mut BytesMut, value: Option<&T>, put: impl FnOnce(&mut BytesMut, &T)) {
    match value {
        Some(v) => {
            buf.put_u8(1);
            put(buf, v);
        }
        None => buf.put_u8(0),
    }
}

fn get_optional<T>(
    buf: &mut &[u8],
    get: impl FnOnce(&mut &[u8]) -> Result<T, CodecError>,
) -> Result<Option<T>, CodecError> {
    match get_u8(buf)? {
        0 => Ok(None),
        1 => get(buf).map(Some),
        other => Err(CodecError::InvalidFlag(other)),
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut &[u8]) -> Result<String, CodecError> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| CodecError::InvalidUtf8)?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn ensure(buf: &&[u8], needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn get_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64_le())
}
