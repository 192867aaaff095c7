use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use bytes::Buf;
use bytes::BufMut;
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;
use tracing::trace;

use super::ErrorCode;
use super::Request;
use super::Response;
use crate::constants::OP_FORGET;
use crate::constants::OP_INVALID;
use crate::constants::OP_MONITOR;
use crate::constants::OP_QUERY;
use crate::constants::QUERY_REPLY_PREFIX_LEN;
use crate::constants::REQUEST_HEADER_LEN;
use crate::constants::RESPONSE_HEADER_LEN;
use crate::constants::WIRE_INT_LEN;
use crate::ChangeSet;
use crate::DirtyUnit;
use crate::DrainStatus;
use crate::Error;
use crate::ProtocolError;

/// Server side of the control channel: decodes requests, encodes responses.
#[derive(Debug, Clone)]
pub struct ServerCodec {
    max_frame_size: usize,
}

impl ServerCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

/// Client side of the control channel: encodes requests, decodes responses.
#[derive(Debug, Clone)]
pub struct ClientCodec {
    max_frame_size: usize,
}

impl ClientCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Request>, Error> {
        let Some(mut frame) = split_frame(src, REQUEST_HEADER_LEN, self.max_frame_size)? else {
            return Ok(None);
        };

        let opcode = take_i32(&mut frame, "opcode")?;
        let request = match opcode {
            OP_MONITOR => {
                let block_size = take_i32(&mut frame, "block_size")?;
                let path = PathBuf::from(OsStr::from_bytes(&frame));
                frame.clear();
                Request::Monitor { block_size, path }
            }
            OP_FORGET => Request::Forget {
                handle: take_i32(&mut frame, "handle")?,
            },
            OP_QUERY => Request::Query {
                handle: take_i32(&mut frame, "handle")?,
                max_items: take_i32(&mut frame, "max_items")?,
            },
            other => return Err(ProtocolError::UnknownOpcode(other).into()),
        };
        expect_consumed(&frame)?;

        trace!(?request, "decoded request");
        Ok(Some(request))
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = Error;

    fn encode(
        &mut self,
        response: Response,
        dst: &mut BytesMut,
    ) -> Result<(), Error> {
        let start = dst.len();
        let result = encode_response(&response, dst).and_then(|_| seal_frame(dst, start, self.max_frame_size));
        if result.is_err() {
            dst.truncate(start);
        }
        result.map_err(Error::from)
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = Error;

    fn encode(
        &mut self,
        request: Request,
        dst: &mut BytesMut,
    ) -> Result<(), Error> {
        let start = dst.len();
        dst.put_i32_le(0);
        dst.put_i32_le(request.opcode());
        match &request {
            Request::Monitor { block_size, path } => {
                dst.put_i32_le(*block_size);
                dst.put_slice(path.as_os_str().as_bytes());
            }
            Request::Forget { handle } => dst.put_i32_le(*handle),
            Request::Query { handle, max_items } => {
                dst.put_i32_le(*handle);
                dst.put_i32_le(*max_items);
            }
        }

        let result = seal_frame(dst, start, self.max_frame_size);
        if result.is_err() {
            dst.truncate(start);
        }
        result.map_err(Error::from)
    }
}

impl Decoder for ClientCodec {
    type Item = Response;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Response>, Error> {
        let Some(mut frame) = split_frame(src, RESPONSE_HEADER_LEN, self.max_frame_size)? else {
            return Ok(None);
        };

        let opcode = take_i32(&mut frame, "opcode")?;
        let code = take_i32(&mut frame, "code")?;
        let failure = if code == 0 {
            None
        } else {
            Some(ErrorCode::from_code(code).ok_or(ProtocolError::UnknownErrorCode(code))?)
        };

        let response = match (opcode, failure) {
            (OP_INVALID, Some(code)) => Response::Invalid(code),
            (OP_INVALID, None) => return Err(ProtocolError::UnknownErrorCode(0).into()),
            (OP_MONITOR, Some(code)) => Response::Monitor(Err(code)),
            (OP_MONITOR, None) => Response::Monitor(Ok(take_i32(&mut frame, "handle")?)),
            (OP_FORGET, Some(code)) => Response::Forget(Err(code)),
            (OP_FORGET, None) => Response::Forget(Ok(())),
            (OP_QUERY, Some(code)) => Response::Query(Err(code)),
            (OP_QUERY, None) => Response::Query(Ok(decode_change_set(&mut frame)?)),
            (other, _) => return Err(ProtocolError::UnknownOpcode(other).into()),
        };
        expect_consumed(&frame)?;

        Ok(Some(response))
    }
}

/// Appends the compact form of `units` to `out`.
///
/// A range starting at block 0 has no negative marker, so it is written as
/// block 0 followed by the rest of the run.
pub fn encode_units(
    units: &[DirtyUnit],
    out: &mut Vec<i32>,
) -> Result<(), ProtocolError> {
    for unit in units {
        match *unit {
            DirtyUnit::Block(block) => out.push(wire_int("block", block)?),
            DirtyUnit::Range { first: 0, length } => {
                out.push(0);
                encode_units(&[DirtyUnit::from_span(1, length - 1)], out)?;
            }
            DirtyUnit::Range { first, length } => {
                out.push(-wire_int("range start", first)?);
                out.push(wire_int("range length", length)?);
            }
        }
    }
    Ok(())
}

/// Decodes compact unit integers, merging runs that the encoder split.
pub fn decode_units(ints: &[i32]) -> Result<Vec<DirtyUnit>, ProtocolError> {
    let mut spans: Vec<(u64, u64)> = Vec::new();
    let mut iter = ints.iter().copied();
    while let Some(value) = iter.next() {
        let (first, last) = if value >= 0 {
            (value as u64, value as u64)
        } else {
            let length = iter.next().ok_or(ProtocolError::Truncated { field: "range length" })?;
            if length <= 0 {
                return Err(ProtocolError::InvalidRange { start: value, length });
            }
            let first = u64::from(value.unsigned_abs());
            (first, first + length as u64 - 1)
        };

        match spans.last_mut() {
            Some((_, prev_last)) if *prev_last + 1 == first => *prev_last = last,
            _ => spans.push((first, last)),
        }
    }
    Ok(spans
        .into_iter()
        .map(|(first, last)| DirtyUnit::from_span(first, last))
        .collect())
}

fn encode_response(
    response: &Response,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    dst.put_i32_le(0);
    dst.put_i32_le(response.opcode());
    if let Some(code) = response.error_code() {
        dst.put_i32_le(code.code());
        return Ok(());
    }

    dst.put_i32_le(0);
    match response {
        Response::Monitor(Ok(handle)) => dst.put_i32_le(*handle),
        Response::Query(Ok(changes)) => {
            let mut ints = Vec::with_capacity(changes.units.len() * 2);
            encode_units(&changes.units, &mut ints)?;
            dst.reserve(QUERY_REPLY_PREFIX_LEN + ints.len() * WIRE_INT_LEN);
            dst.put_i32_le(changes.status.code());
            dst.put_i32_le(ints.len() as i32);
            for value in ints {
                dst.put_i32_le(value);
            }
        }
        _ => {}
    }
    Ok(())
}

fn decode_change_set(frame: &mut BytesMut) -> Result<ChangeSet, ProtocolError> {
    let status_code = take_i32(frame, "status")?;
    let status = DrainStatus::from_code(status_code).ok_or(ProtocolError::UnknownStatus(status_code))?;
    let count = take_i32(frame, "count")?;
    if count < 0 || count as usize * WIRE_INT_LEN != frame.remaining() {
        return Err(ProtocolError::Truncated { field: "units" });
    }

    let mut ints = Vec::with_capacity(count as usize);
    for _ in 0..count {
        ints.push(frame.get_i32_le());
    }
    Ok(ChangeSet {
        status,
        units: decode_units(&ints)?,
    })
}

/// Splits one complete frame off `src`, leaving the size field consumed.
fn split_frame(
    src: &mut BytesMut,
    header_len: usize,
    max_frame_size: usize,
) -> Result<Option<BytesMut>, ProtocolError> {
    if src.len() < WIRE_INT_LEN {
        return Ok(None);
    }

    let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    if declared < header_len as i32 {
        return Err(ProtocolError::InvalidFrameSize(declared));
    }
    let size = declared as usize;
    if size > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    if src.len() < size {
        src.reserve(size - src.len());
        return Ok(None);
    }

    let mut frame = src.split_to(size);
    frame.advance(WIRE_INT_LEN);
    Ok(Some(frame))
}

/// Writes the final size into the placeholder at `start`.
fn seal_frame(
    dst: &mut BytesMut,
    start: usize,
    max_frame_size: usize,
) -> Result<(), ProtocolError> {
    let size = dst.len() - start;
    if size > max_frame_size || size > i32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }
    dst[start..start + WIRE_INT_LEN].copy_from_slice(&(size as i32).to_le_bytes());
    Ok(())
}

fn take_i32(
    frame: &mut BytesMut,
    field: &'static str,
) -> Result<i32, ProtocolError> {
    if frame.remaining() < WIRE_INT_LEN {
        return Err(ProtocolError::Truncated { field });
    }
    Ok(frame.get_i32_le())
}

fn expect_consumed(frame: &BytesMut) -> Result<(), ProtocolError> {
    if frame.has_remaining() {
        return Err(ProtocolError::TrailingBytes(frame.remaining()));
    }
    Ok(())
}

fn wire_int(
    field: &'static str,
    value: u64,
) -> Result<i32, ProtocolError> {
    i32::try_from(value).map_err(|_| ProtocolError::ValueOutOfRange { field, value })
}
