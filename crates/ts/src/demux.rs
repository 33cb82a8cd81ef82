use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;
use tracing::{debug, trace, warn};

use crate::packet::{PACKET_SIZE, PID_NULL, PID_PAT, SYNC_BYTE, TsPacket};
use crate::pes::PesHeader;
use crate::psi::{Pat, Pmt, PmtStream, StreamType, section_len};

/// A reassembled PES packet's elementary stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryPacket {
    pub pid: u16,
    pub stream_type: StreamType,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Set when the first TS packet of this PES carried the random access indicator.
    pub random_access: bool,
    pub data: Bytes,
}

#[derive(Debug)]
struct PesAssembler {
    stream_type: StreamType,
    buffer: BytesMut,
    random_access: bool,
}

impl PesAssembler {
    fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            buffer: BytesMut::new(),
            random_access: false,
        }
    }

    /// Turn the buffered bytes into an elementary packet, if they form a valid PES.
    fn take(&mut self, pid: u16) -> Option<ElementaryPacket> {
        if self.buffer.is_empty() {
            return None;
        }
        let data = self.buffer.split().freeze();
        let random_access = std::mem::take(&mut self.random_access);
        match PesHeader::parse(&data) {
            Ok(header) => {
                let end = header.total_len().unwrap_or(data.len()).min(data.len());
                if header.payload_offset > end {
                    warn!(pid, "PES header longer than its packet, dropping");
                    return None;
                }
                Some(ElementaryPacket {
                    pid,
                    stream_type: self.stream_type,
                    pts: header.pts,
                    dts: header.dts.or(header.pts),
                    random_access,
                    data: data.slice(header.payload_offset..end),
                })
            }
            Err(e) => {
                warn!(pid, error = %e, "Dropping malformed PES packet");
                None
            }
        }
    }
}

/// Incremental transport stream demuxer.
///
/// Bytes may be pushed in arbitrary chunks; a trailing partial packet is kept
/// until the next push. Only the first program announced in the PAT is
/// followed.
#[derive(Debug, Default)]
pub struct Demuxer {
    remainder: BytesMut,
    validate_crc: bool,
    pat: Option<Pat>,
    pmt_pid: Option<u16>,
    pmt: Option<Pmt>,
    sections: HashMap<u16, BytesMut>,
    streams: HashMap<u16, PesAssembler>,
    dropped_packets: usize,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable CRC-32/MPEG-2 validation on PAT/PMT sections.
    pub fn with_crc_validation(mut self, enable: bool) -> Self {
        self.validate_crc = enable;
        self
    }

    /// Streams announced by the current PMT.
    pub fn streams(&self) -> &[PmtStream] {
        match &self.pmt {
            Some(pmt) => &pmt.streams,
            None => &[],
        }
    }

    pub fn has_program(&self) -> bool {
        self.pmt.is_some()
    }

    /// Number of packets skipped because they failed to parse.
    pub fn dropped_packets(&self) -> usize {
        self.dropped_packets
    }

    /// Feed a chunk of transport stream bytes, returning every PES completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ElementaryPacket> {
        self.remainder.extend_from_slice(chunk);
        let mut data = self.remainder.split();
        let mut out = Vec::new();

        loop {
            let Some(sync) = memchr(SYNC_BYTE, &data) else {
                data.clear();
                break;
            };
            data.advance(sync);
            if data.len() < PACKET_SIZE {
                break;
            }
            if data.len() > PACKET_SIZE && data[PACKET_SIZE] != SYNC_BYTE {
                self.dropped_packets += 1;
                data.advance(1);
                continue;
            }
            match TsPacket::parse(&data[..PACKET_SIZE]) {
                Ok(packet) => {
                    self.handle_packet(&packet, &mut out);
                    data.advance(PACKET_SIZE);
                }
                Err(e) => {
                    trace!(error = %e, "Resyncing after invalid packet");
                    self.dropped_packets += 1;
                    data.advance(1);
                }
            }
        }

        self.remainder = data;
        out
    }

    /// Emit every PES still being assembled. Called at the end of a chunk so
    /// unbounded (length 0) video PES packets are not held back.
    pub fn flush(&mut self) -> Vec<ElementaryPacket> {
        let mut pids: Vec<u16> = self.streams.keys().copied().collect();
        pids.sort_unstable();
        pids.into_iter()
            .filter_map(|pid| self.streams.get_mut(&pid).and_then(|s| s.take(pid)))
            .collect()
    }

    /// Drop partially received packets and PES payloads, keeping the program tables.
    pub fn discard_partial(&mut self) {
        self.remainder.clear();
        for assembler in self.streams.values_mut() {
            assembler.buffer.clear();
            assembler.random_access = false;
        }
    }

    /// Forget all program and stream state.
    pub fn reset(&mut self) {
        *self = Self::new().with_crc_validation(self.validate_crc);
    }

    fn handle_packet(&mut self, packet: &TsPacket<'_>, out: &mut Vec<ElementaryPacket>) {
        if packet.transport_error {
            self.dropped_packets += 1;
            return;
        }
        match packet.pid {
            PID_NULL => {}
            PID_PAT => self.handle_section(packet),
            pid if Some(pid) == self.pmt_pid => self.handle_section(packet),
            pid => {
                let Some(assembler) = self.streams.get_mut(&pid) else {
                    return;
                };
                if packet.payload_unit_start {
                    out.extend(assembler.take(pid));
                    assembler.random_access = packet.random_access;
                } else if assembler.buffer.is_empty() {
                    // continuation without a start, e.g. stream joined mid-PES
                    return;
                }
                assembler.buffer.extend_from_slice(packet.payload);
            }
        }
    }

    fn handle_section(&mut self, packet: &TsPacket<'_>) {
        let pid = packet.pid;
        if let Some(start) = packet.section_start() {
            let buffer = self.sections.entry(pid).or_default();
            buffer.clear();
            buffer.extend_from_slice(start);
        } else if let Some(buffer) = self.sections.get_mut(&pid) {
            if buffer.is_empty() {
                return;
            }
            buffer.extend_from_slice(packet.payload);
        } else {
            return;
        }

        let Some(buffer) = self.sections.get_mut(&pid) else {
            return;
        };
        let Some(len) = section_len(buffer) else {
            return;
        };
        if buffer.len() < len {
            return;
        }
        let section = buffer.split().freeze();

        if pid == PID_PAT {
            match Pat::parse(&section, self.validate_crc) {
                Ok(pat) => self.apply_pat(pat),
                Err(e) => warn!(error = %e, "Ignoring invalid PAT"),
            }
        } else {
            match Pmt::parse(&section, self.validate_crc) {
                Ok(pmt) => self.apply_pmt(pmt),
                Err(e) => warn!(pid, error = %e, "Ignoring invalid PMT"),
            }
        }
    }

    fn apply_pat(&mut self, pat: Pat) {
        if self.pat.as_ref().is_some_and(|p| p.version == pat.version) {
            return;
        }
        let pmt_pid = pat.programs.first().map(|p| p.pmt_pid);
        if pmt_pid != self.pmt_pid {
            debug!(?pmt_pid, "PAT selected program map PID");
            self.pmt = None;
        }
        self.pmt_pid = pmt_pid;
        self.pat = Some(pat);
    }

    fn apply_pmt(&mut self, pmt: Pmt) {
        if self.pmt.as_ref().is_some_and(|p| p.version == pmt.version) {
            return;
        }
        debug!(version = pmt.version, streams = pmt.streams.len(), "PMT updated");
        self.streams
            .retain(|pid, _| pmt.streams.iter().any(|s| s.elementary_pid == *pid));
        for stream in &pmt.streams {
            self.streams
                .entry(stream.elementary_pid)
                .and_modify(|a| a.stream_type = stream.stream_type)
                .or_insert_with(|| PesAssembler::new(stream.stream_type));
        }
        self.pmt = Some(pmt);
    }
}
