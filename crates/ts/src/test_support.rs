//! Helpers to synthesize transport streams for tests and benchmarks.

use crate::packet::{PACKET_SIZE, PID_PAT, SYNC_BYTE};
use crate::pes::write_timestamp;
use crate::psi::build_section;

/// Split `payload` into TS packets on `pid`, padding the last one with an
/// adaptation field. `pusi` marks the first packet as a unit start.
pub fn packetize(pid: u16, payload: &[u8], pusi: bool, cc: &mut u8, random_access: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = payload;
    let mut first = true;
    loop {
        let start = first && pusi;
        let ra = first && random_access;
        let mut header_room = PACKET_SIZE - 4;
        let needs_af = ra || rest.len() < header_room;
        let af_len = if needs_af {
            let min_af = if ra { 2 } else { 1 };
            header_room -= min_af;
            let af_len = if rest.len() < header_room {
                min_af + (header_room - rest.len())
            } else {
                min_af
            };
            header_room = PACKET_SIZE - 4 - af_len;
            Some(af_len)
        } else {
            None
        };
        let take = rest.len().min(header_room);

        let mut packet = Vec::with_capacity(PACKET_SIZE);
        packet.push(SYNC_BYTE);
        packet.push(((pid >> 8) as u8 & 0x1F) | if start { 0x40 } else { 0 });
        packet.push(pid as u8);
        let afc = if af_len.is_some() { 0x30 } else { 0x10 };
        packet.push(afc | (*cc & 0x0F));
        *cc = cc.wrapping_add(1) & 0x0F;
        if let Some(af_len) = af_len {
            // af_len counts the length byte itself
            packet.push((af_len - 1) as u8);
            if af_len > 1 {
                packet.push(if ra { 0x40 } else { 0x00 });
                packet.resize(4 + af_len, 0xFF);
            }
        }
        packet.extend_from_slice(&rest[..take]);
        debug_assert_eq!(packet.len(), PACKET_SIZE);
        out.extend_from_slice(&packet);

        rest = &rest[take..];
        first = false;
        if rest.is_empty() {
            break;
        }
    }
    out
}

/// A PSI packet carrying one section.
pub fn psi_packet(pid: u16, section: &[u8], cc: &mut u8) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend_from_slice(section);
    payload.resize(PACKET_SIZE - 4, 0xFF);
    let mut packet = vec![
        SYNC_BYTE,
        0x40 | ((pid >> 8) as u8 & 0x1F),
        pid as u8,
        0x10 | (*cc & 0x0F),
    ];
    *cc = cc.wrapping_add(1) & 0x0F;
    packet.extend_from_slice(&payload);
    packet
}

/// PAT announcing program 1 on `pmt_pid`.
pub fn pat(pmt_pid: u16) -> Vec<u8> {
    let body = [
        0x00,
        0x01,
        0xE0 | ((pmt_pid >> 8) as u8 & 0x1F),
        pmt_pid as u8,
    ];
    let mut cc = 0;
    psi_packet(PID_PAT, &build_section(0x00, 1, 0, &body), &mut cc)
}

/// PMT listing `(stream_type, pid)` pairs.
pub fn pmt(pmt_pid: u16, streams: &[(u8, u16)]) -> Vec<u8> {
    let pcr_pid = streams.first().map_or(0x1FFF, |s| s.1);
    let mut body = vec![0xE0 | ((pcr_pid >> 8) as u8 & 0x1F), pcr_pid as u8, 0xF0, 0x00];
    for &(stream_type, pid) in streams {
        body.extend_from_slice(&[stream_type, 0xE0 | ((pid >> 8) as u8 & 0x1F), pid as u8, 0xF0, 0x00]);
    }
    let mut cc = 0;
    psi_packet(pmt_pid, &build_section(0x02, 1, 0, &body), &mut cc)
}

/// A PES packet with PTS (and DTS when it differs).
pub fn pes(stream_id: u8, pts: u64, dts: Option<u64>, payload: &[u8], bounded: bool) -> Vec<u8> {
    let mut header = vec![0x00, 0x00, 0x01, stream_id, 0x00, 0x00, 0x80];
    match dts {
        Some(dts) if dts != pts => {
            header.extend_from_slice(&[0xC0, 10]);
            header.extend_from_slice(&write_timestamp(0b0011, pts));
            header.extend_from_slice(&write_timestamp(0b0001, dts));
        }
        _ => {
            header.extend_from_slice(&[0x80, 5]);
            header.extend_from_slice(&write_timestamp(0b0010, pts));
        }
    }
    if bounded {
        let len = (header.len() - 6 + payload.len()) as u16;
        header[4..6].copy_from_slice(&len.to_be_bytes());
    }
    header.extend_from_slice(payload);
    header
}
