// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Little-endian parameter-list primitives.
//!
//! ```text
//! +--------+--------+------------------------+
//! | pid u16| len u16| value (len, 4-aligned) |  ... PID_SENTINEL
//! +--------+--------+------------------------+
//! ```

use crate::core::GUID;
use crate::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

pub const PID_PAD: u16 = 0x0000;
pub const PID_SENTINEL: u16 = 0x0001;
pub const PID_PARTICIPANT_LEASE_DURATION: u16 = 0x0002;
pub const PID_TOPIC_NAME: u16 = 0x0005;
pub const PID_TYPE_NAME: u16 = 0x0007;
pub const PID_DOMAIN_ID: u16 = 0x000f;
pub const PID_PROTOCOL_VERSION: u16 = 0x0015;
pub const PID_VENDORID: u16 = 0x0016;
pub const PID_RELIABILITY: u16 = 0x001a;
pub const PID_LIVELINESS: u16 = 0x001b;
pub const PID_DURABILITY: u16 = 0x001d;
pub const PID_OWNERSHIP: u16 = 0x001f;
pub const PID_DEADLINE: u16 = 0x0023;
pub const PID_DESTINATION_ORDER: u16 = 0x0025;
pub const PID_PARTITION: u16 = 0x0029;
pub const PID_USER_DATA: u16 = 0x002c;
pub const PID_TOPIC_DATA: u16 = 0x002e;
pub const PID_UNICAST_LOCATOR: u16 = 0x002f;
pub const PID_DEFAULT_UNICAST_LOCATOR: u16 = 0x0031;
pub const PID_METATRAFFIC_UNICAST_LOCATOR: u16 = 0x0032;
pub const PID_METATRAFFIC_MULTICAST_LOCATOR: u16 = 0x0033;
pub const PID_CONTENT_FILTER_PROPERTY: u16 = 0x0035;
pub const PID_HISTORY: u16 = 0x0040;
pub const PID_DEFAULT_MULTICAST_LOCATOR: u16 = 0x0048;
pub const PID_PARTICIPANT_GUID: u16 = 0x0050;
pub const PID_BUILTIN_ENDPOINT_SET: u16 = 0x0058;
pub const PID_ENDPOINT_GUID: u16 = 0x005a;
pub const PID_KEY_HASH: u16 = 0x0070;
pub const PID_STATUS_INFO: u16 = 0x0071;
pub const PID_TYPE_INFORMATION: u16 = 0x0075;
pub const PID_IDENTITY_TOKEN: u16 = 0x1001;
pub const PID_HDDS_SPDP_UNICAST_LOCATOR: u16 = 0x8001;
pub const PID_HDDS_ICE_CANDIDATE: u16 = 0x8002;
pub const PID_HDDS_USER_TAG: u16 = 0x8003;
pub const PID_HDDS_PARTICIPANT_FLAGS: u16 = 0x8004;
pub const PID_HDDS_LIVELINESS_KIND: u16 = 0x8005;

/// STATUS_INFO bits.
pub const STATUS_INFO_DISPOSED: u32 = 0x1;
pub const STATUS_INFO_UNREGISTERED: u32 = 0x2;

const LOCATOR_KIND_UDPV4: i32 = 1;
const LOCATOR_KIND_UDPV6: i32 = 2;

/// Bounds-checked little-endian reader.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Malformed(format!(
                "truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    /// Length-prefixed (u32) octet sequence.
    pub fn octets(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Length-prefixed string including its NUL terminator.
    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        let text = raw.strip_suffix(&[0]).unwrap_or(raw);
        let s = std::str::from_utf8(text)
            .map_err(|_| Error::Malformed("string is not UTF-8".to_string()))?
            .to_string();
        self.align(4);
        Ok(s)
    }

    pub fn string_seq(&mut self) -> Result<Vec<String>> {
        let n = self.u32()? as usize;
        if n > self.remaining() {
            return Err(Error::Malformed(format!("string sequence of {} entries", n)));
        }
        (0..n).map(|_| self.string()).collect()
    }

    pub fn guid(&mut self) -> Result<GUID> {
        Ok(GUID::from_bytes(self.array()?))
    }

    pub fn duration(&mut self) -> Result<Duration> {
        let secs = self.u32()?;
        let nanos = self.u32()?;
        if secs == 0x7fff_ffff && nanos == 0xffff_ffff {
            return Ok(Duration::MAX);
        }
        if nanos >= 1_000_000_000 {
            return Err(Error::Malformed(format!("duration nanos {}", nanos)));
        }
        Ok(Duration::new(u64::from(secs), nanos))
    }

    pub fn locator(&mut self) -> Result<SocketAddr> {
        let kind = self.i32()?;
        let port = self.u32()?;
        let addr: [u8; 16] = self.array()?;
        let port = u16::try_from(port)
            .map_err(|_| Error::Malformed(format!("locator port {}", port)))?;
        let ip = match kind {
            LOCATOR_KIND_UDPV4 => IpAddr::V4(Ipv4Addr::new(addr[12], addr[13], addr[14], addr[15])),
            LOCATOR_KIND_UDPV6 => IpAddr::V6(Ipv6Addr::from(addr)),
            other => return Err(Error::Malformed(format!("locator kind {}", other))),
        };
        Ok(SocketAddr::new(ip, port))
    }

    fn align(&mut self, to: usize) {
        let pad = (to - self.pos % to) % to;
        self.pos = (self.pos + pad).min(self.buf.len());
    }
}

/// Little-endian writer for submessage bodies and parameter values.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn octets(&mut self, b: &[u8]) -> &mut Self {
        self.u32(b.len() as u32).bytes(b)
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32 + 1).bytes(s.as_bytes()).u8(0);
        self.align(4)
    }

    pub fn string_seq(&mut self, items: &[String]) -> &mut Self {
        self.u32(items.len() as u32);
        for item in items {
            self.string(item);
        }
        self
    }

    pub fn guid(&mut self, guid: &GUID) -> &mut Self {
        self.bytes(&guid.as_bytes())
    }

    pub fn duration(&mut self, d: Duration) -> &mut Self {
        if d == Duration::MAX || d.as_secs() >= 0x7fff_ffff {
            return self.u32(0x7fff_ffff).u32(0xffff_ffff);
        }
        self.u32(d.as_secs() as u32).u32(d.subsec_nanos())
    }

    pub fn locator(&mut self, addr: &SocketAddr) -> &mut Self {
        let mut raw = [0u8; 16];
        let kind = match addr.ip() {
            IpAddr::V4(v4) => {
                raw[12..16].copy_from_slice(&v4.octets());
                LOCATOR_KIND_UDPV4
            }
            IpAddr::V6(v6) => {
                raw = v6.octets();
                LOCATOR_KIND_UDPV6
            }
        };
        self.i32(kind).u32(u32::from(addr.port())).bytes(&raw)
    }

    pub fn align(&mut self, to: usize) -> &mut Self {
        while self.buf.len() % to != 0 {
            self.buf.push(0);
        }
        self
    }
}

/// Builds a parameter list terminated by PID_SENTINEL.
#[derive(Default)]
pub struct ParamListWriter {
    out: Writer,
}

impl ParamListWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one parameter whose value is produced by `fill`.
    pub fn param(&mut self, pid: u16, fill: impl FnOnce(&mut Writer)) -> &mut Self {
        let mut value = Writer::new();
        fill(&mut value);
        value.align(4);
        let value = value.into_inner();
        self.out.u16(pid).u16(value.len() as u16).bytes(&value);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.out.u16(PID_SENTINEL).u16(0);
        self.out.into_inner()
    }
}

/// Split a parameter list into (pid, value) pairs, stopping at the sentinel.
pub fn read_param_list(buf: &[u8]) -> Result<Vec<(u16, &[u8])>> {
    let mut cursor = Cursor::new(buf);
    let mut params = Vec::new();
    loop {
        if cursor.remaining() == 0 {
            return Err(Error::Malformed("parameter list without sentinel".to_string()));
        }
        let pid = cursor.u16()?;
        let len = cursor.u16()? as usize;
        if pid == PID_SENTINEL {
            return Ok(params);
        }
        let value = cursor.take(len)?;
        if pid != PID_PAD {
            params.push((pid, value));
        }
    }
}
