//! Byte-level framing for the three Modbus transports.
//!
//! A framer pulls complete, checksum-validated requests out of a receive
//! buffer and wraps response PDUs back into the transport envelope. The
//! protocol engine only ever sees `(unit id, PDU)`.

use bytes::{Buf, BytesMut};
use log::{trace, warn};

use super::crc::{crc16_modbus, lrc};
use super::protocol::{
    ENCAPSULATED_INTERFACE, WRITE_MULTIPLE_COILS, WRITE_MULTIPLE_REGISTERS,
};
use crate::utils::error::{SlaveError, SlaveResult};

/// Longest PDU the protocol allows.
pub const MAX_PDU_LEN: usize = 253;

/// One request as delivered by a framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu {
    pub unit_id: u8,
    /// MBAP transaction id, TCP only.
    pub transaction_id: Option<u16>,
    pub pdu: Vec<u8>,
}

pub trait Framer: Send {
    /// Take the next complete request off the front of `buf`.
    ///
    /// `Ok(None)` means more bytes are needed. On a checksum or header error
    /// the offending bytes are dropped from `buf` before the error is returned.
    fn decode(&mut self, buf: &mut BytesMut) -> SlaveResult<Option<RequestAdu>>;

    /// Called when the line has been idle for a read timeout with `buf`
    /// still holding bytes.
    fn decode_idle(&mut self, buf: &mut BytesMut) -> SlaveResult<Option<RequestAdu>> {
        if !buf.is_empty() {
            warn!("Discarding {} byte(s) of incomplete frame", buf.len());
            buf.clear();
        }
        Ok(None)
    }

    /// Wrap a response PDU for the request it answers.
    fn encode(&self, request: &RequestAdu, pdu: &[u8]) -> Vec<u8>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// RTU
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RtuFramer;

impl RtuFramer {
    pub fn new() -> Self {
        Self
    }

    /// Full request length (unit id through CRC) derived from the function
    /// code, or `None` when the header is not in yet or the code is unknown.
    fn expected_len(buf: &[u8]) -> Option<usize> {
        let fc = *buf.get(1)?;
        match fc {
            0x01..=0x06 => Some(8),
            WRITE_MULTIPLE_COILS | WRITE_MULTIPLE_REGISTERS => {
                let byte_count = *buf.get(6)? as usize;
                Some(9 + byte_count)
            }
            ENCAPSULATED_INTERFACE => Some(7),
            _ => None,
        }
    }

    fn check_frame(frame: &[u8]) -> SlaveResult<RequestAdu> {
        if frame.len() < 4 {
            return Err(SlaveError::InvalidFrame(format!("RTU frame of {} byte(s)", frame.len())));
        }
        let data_len = frame.len() - 2;
        let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        let calculated = crc16_modbus(&frame[..data_len]);
        if received != calculated {
            return Err(SlaveError::CrcError);
        }
        Ok(RequestAdu {
            unit_id: frame[0],
            transaction_id: None,
            pdu: frame[1..data_len].to_vec(),
        })
    }
}

impl Framer for RtuFramer {
    fn decode(&mut self, buf: &mut BytesMut) -> SlaveResult<Option<RequestAdu>> {
        let Some(len) = Self::expected_len(buf) else {
            // No length rule: wait for the idle gap, but never past the
            // longest legal frame.
            if buf.len() > MAX_PDU_LEN + 3 {
                let dropped = buf.len();
                buf.clear();
                return Err(SlaveError::InvalidFrame(format!(
                    "{} byte(s) without a frame boundary",
                    dropped
                )));
            }
            return Ok(None);
        };
        if len > MAX_PDU_LEN + 3 {
            buf.clear();
            return Err(SlaveError::InvalidFrame(format!("RTU frame length {}", len)));
        }
        if buf.len() < len {
            return Ok(None);
        }
        let frame = buf.split_to(len);
        trace!("RTU rx {}", hex::encode(&frame));
        match Self::check_frame(&frame) {
            Ok(adu) => Ok(Some(adu)),
            Err(e) => {
                // A bad CRC means we lost sync; whatever follows is suspect.
                buf.clear();
                Err(e)
            }
        }
    }

    fn decode_idle(&mut self, buf: &mut BytesMut) -> SlaveResult<Option<RequestAdu>> {
        if buf.is_empty() {
            return Ok(None);
        }
        // Unknown function codes have no length rule; the silent interval
        // closes the frame instead.
        let frame = buf.split();
        trace!("RTU rx (idle) {}", hex::encode(&frame));
        Self::check_frame(&frame).map(Some)
    }

    fn encode(&self, request: &RequestAdu, pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(pdu.len() + 3);
        frame.push(request.unit_id);
        frame.extend_from_slice(pdu);
        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        trace!("RTU tx {}", hex::encode(&frame));
        frame
    }

    fn name(&self) -> &'static str {
        "rtu"
    }
}

// ---------------------------------------------------------------------------
// ASCII
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AsciiFramer;

impl AsciiFramer {
    pub fn new() -> Self {
        Self
    }
}

impl Framer for AsciiFramer {
    fn decode(&mut self, buf: &mut BytesMut) -> SlaveResult<Option<RequestAdu>> {
        // Drop noise before the start character.
        match buf.iter().position(|b| *b == b':') {
            Some(start) => buf.advance(start),
            None => {
                buf.clear();
                return Ok(None);
            }
        }

        let Some(mut end) = buf.windows(2).position(|w| w == b"\r\n") else {
            if buf.len() > 1 + 2 * (MAX_PDU_LEN + 2) + 2 {
                buf.clear();
                return Err(SlaveError::InvalidFrame("ASCII frame without terminator".to_string()));
            }
            return Ok(None);
        };

        // A second start character means the earlier frame was abandoned.
        if let Some(restart) = buf[..end].iter().rposition(|b| *b == b':').filter(|p| *p > 0) {
            warn!("Discarding {} byte(s) of abandoned ASCII frame", restart);
            buf.advance(restart);
            end -= restart;
        }

        let frame = buf.split_to(end + 2);
        trace!("ASCII rx {}", String::from_utf8_lossy(&frame).trim_end());
        let body = &frame[1..end];
        let bytes = hex::decode(body)
            .map_err(|e| SlaveError::InvalidFrame(format!("ASCII frame is not hex: {}", e)))?;
        if bytes.len() < 3 {
            return Err(SlaveError::InvalidFrame(format!("ASCII frame of {} byte(s)", bytes.len())));
        }

        let (data, check) = bytes.split_at(bytes.len() - 1);
        if lrc(data) != check[0] {
            return Err(SlaveError::LrcError);
        }
        Ok(Some(RequestAdu {
            unit_id: data[0],
            transaction_id: None,
            pdu: data[1..].to_vec(),
        }))
    }

    fn encode(&self, request: &RequestAdu, pdu: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(pdu.len() + 2);
        data.push(request.unit_id);
        data.extend_from_slice(pdu);
        data.push(lrc(&data));

        let mut frame = Vec::with_capacity(data.len() * 2 + 3);
        frame.push(b':');
        frame.extend_from_slice(hex::encode_upper(&data).as_bytes());
        frame.extend_from_slice(b"\r\n");
        frame
    }

    fn name(&self) -> &'static str {
        "ascii"
    }
}

// ---------------------------------------------------------------------------
// TCP (MBAP)
// ---------------------------------------------------------------------------

const MBAP_HEADER_LEN: usize = 7;

#[derive(Debug, Default)]
pub struct TcpFramer;

impl TcpFramer {
    pub fn new() -> Self {
        Self
    }
}

impl Framer for TcpFramer {
    fn decode(&mut self, buf: &mut BytesMut) -> SlaveResult<Option<RequestAdu>> {
        if buf.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }
        let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
        let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
        let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;

        if protocol_id != 0 {
            buf.clear();
            return Err(SlaveError::InvalidFrame(format!("MBAP protocol id {}", protocol_id)));
        }
        // Length covers the unit id and the PDU.
        if length < 2 || length > MAX_PDU_LEN + 1 {
            buf.clear();
            return Err(SlaveError::InvalidFrame(format!("MBAP length {}", length)));
        }
        if buf.len() < 6 + length {
            return Ok(None);
        }

        let frame = buf.split_to(6 + length);
        trace!("TCP rx {}", hex::encode(&frame));
        Ok(Some(RequestAdu {
            unit_id: frame[6],
            transaction_id: Some(transaction_id),
            pdu: frame[MBAP_HEADER_LEN..].to_vec(),
        }))
    }

    fn decode_idle(&mut self, _buf: &mut BytesMut) -> SlaveResult<Option<RequestAdu>> {
        // Stream transport: partial frames just wait for more bytes.
        Ok(None)
    }

    fn encode(&self, request: &RequestAdu, pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
        frame.extend_from_slice(&request.transaction_id.unwrap_or(0).to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        frame.push(request.unit_id);
        frame.extend_from_slice(pdu);
        trace!("TCP tx {}", hex::encode(&frame));
        frame
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtu_frame(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn test_rtu_decodes_fixed_length_request() {
        let mut framer = RtuFramer::new();
        let mut buf = BytesMut::from(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD][..]);
        let adu = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.unit_id, 1);
        assert_eq!(adu.pdu, vec![0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_rtu_waits_for_partial_frame() {
        let mut framer = RtuFramer::new();
        let full = rtu_frame(&[0x01, 0x10, 0x00, 0x01, 0x00, 0x01, 0x02, 0x12, 0x34]);
        let mut buf = BytesMut::from(&full[..5]);
        assert!(framer.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[5..]);
        let adu = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.pdu[0], 0x10);
        assert_eq!(adu.pdu.len(), 8);
    }

    #[test]
    fn test_rtu_splits_back_to_back_frames() {
        let mut framer = RtuFramer::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&rtu_frame(&[0x01, 0x06, 0x00, 0x02, 0x00, 0x07]));
        buf.extend_from_slice(&rtu_frame(&[0x01, 0x03, 0x00, 0x02, 0x00, 0x01]));
        assert_eq!(framer.decode(&mut buf).unwrap().unwrap().pdu[0], 0x06);
        assert_eq!(framer.decode(&mut buf).unwrap().unwrap().pdu[0], 0x03);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_rtu_bad_crc_drops_buffer() {
        let mut framer = RtuFramer::new();
        let mut buf = BytesMut::from(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCE, 0x01][..]);
        assert!(matches!(framer.decode(&mut buf), Err(SlaveError::CrcError)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_rtu_unknown_function_closed_by_idle_gap() {
        let mut framer = RtuFramer::new();
        let mut buf = BytesMut::from(&rtu_frame(&[0x01, 0x41, 0x00])[..]);
        assert!(framer.decode(&mut buf).unwrap().is_none());
        let adu = framer.decode_idle(&mut buf).unwrap().unwrap();
        assert_eq!(adu.pdu, vec![0x41, 0x00]);
    }

    #[test]
    fn test_rtu_unknown_function_on_busy_line_is_bounded() {
        let mut framer = RtuFramer::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x01, 0x41]);
        let mut dropped = false;
        for _ in 0..100 {
            buf.extend_from_slice(&[0x55; 8]);
            match framer.decode(&mut buf) {
                Ok(None) => assert!(buf.len() <= MAX_PDU_LEN + 3),
                Err(SlaveError::InvalidFrame(_)) => {
                    dropped = true;
                    assert!(buf.is_empty());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(dropped);
    }

    #[test]
    fn test_rtu_encode_appends_crc() {
        let framer = RtuFramer::new();
        let request = RequestAdu { unit_id: 1, transaction_id: None, pdu: vec![] };
        let frame = framer.encode(&request, &[0x83, 0x02]);
        assert_eq!(&frame[..3], &[0x01, 0x83, 0x02]);
        assert_eq!(crc16_modbus(&frame), 0);
    }

    #[test]
    fn test_ascii_round_trip_and_noise() {
        let mut framer = AsciiFramer::new();
        let mut buf = BytesMut::from(&b"\x00\x00:F7031389000A60\r\n"[..]);
        let adu = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.unit_id, 0xF7);
        assert_eq!(adu.pdu, vec![0x03, 0x13, 0x89, 0x00, 0x0A]);
        assert!(buf.is_empty());

        let out = framer.encode(&adu, &[0x83, 0x02]);
        assert_eq!(out, b":F7830284\r\n".to_vec());
    }

    #[test]
    fn test_ascii_restarts_at_new_start_character() {
        let mut framer = AsciiFramer::new();
        let mut buf = BytesMut::from(&b":F703:F7031389000A60\r\n"[..]);
        let adu = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.unit_id, 0xF7);
        assert_eq!(adu.pdu, vec![0x03, 0x13, 0x89, 0x00, 0x0A]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_ascii_bad_lrc() {
        let mut framer = AsciiFramer::new();
        let mut buf = BytesMut::from(&b":F7031389000A61\r\n"[..]);
        assert!(matches!(framer.decode(&mut buf), Err(SlaveError::LrcError)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_tcp_decode_and_encode() {
        let mut framer = TcpFramer::new();
        let mut buf = BytesMut::from(
            &[0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03][..],
        );
        let adu = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.transaction_id, Some(0x2A));
        assert_eq!(adu.unit_id, 0x11);
        assert_eq!(adu.pdu, vec![0x03, 0x00, 0x6B, 0x00, 0x03]);

        let out = framer.encode(&adu, &[0x83, 0x02]);
        assert_eq!(out, vec![0x00, 0x2A, 0x00, 0x00, 0x00, 0x03, 0x11, 0x83, 0x02]);
    }

    #[test]
    fn test_tcp_rejects_foreign_protocol() {
        let mut framer = TcpFramer::new();
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x01, 0x03][..]);
        assert!(matches!(framer.decode(&mut buf), Err(SlaveError::InvalidFrame(_))));
    }
}
