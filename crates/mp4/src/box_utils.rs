/// Parsed view over a single ISOBMFF box inside a parent byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxView {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) fourcc: [u8; 4],
    pub(crate) body_start: usize,
}

/// Read a box header: returns `(total_box_size, fourcc, header_size)`.
///
/// Handles 32-bit size, 64-bit extended size (`size == 1`),
/// and box-extends-to-EOF (`size == 0`).
pub(crate) fn read_box_header(data: &[u8]) -> Option<(usize, [u8; 4], usize)> {
    if data.len() < 8 {
        return None;
    }

    let size = read_u32(data, 0)? as u64;
    let fourcc: [u8; 4] = [data[4], data[5], data[6], data[7]];

    match size {
        1 => Some((read_u64(data, 8)? as usize, fourcc, 16)),
        0 => Some((data.len(), fourcc, 8)),
        _ => Some((size as usize, fourcc, 8)),
    }
}

/// Parse a single box located at `offset` within `[0..end)`.
pub(crate) fn box_at(data: &[u8], offset: usize, end: usize) -> Option<BoxView> {
    if offset >= end || end > data.len() {
        return None;
    }

    let (size, fourcc, header_size) = read_box_header(&data[offset..end])?;
    if size < header_size || offset + size > end {
        return None;
    }

    Some(BoxView {
        start: offset,
        end: offset + size,
        fourcc,
        body_start: offset + header_size,
    })
}

/// Iterate over sibling boxes in `[start..end)`, stopping at the first malformed header.
pub(crate) fn children(data: &[u8], start: usize, end: usize) -> impl Iterator<Item = BoxView> + '_ {
    let mut offset = start;
    std::iter::from_fn(move || {
        let parsed = box_at(data, offset, end)?;
        offset = parsed.end;
        Some(parsed)
    })
}

/// Find the first child box with the given FourCC inside `[start..end)`.
pub(crate) fn find_first_box(data: &[u8], start: usize, end: usize, target: [u8; 4]) -> Option<BoxView> {
    children(data, start, end).find(|b| b.fourcc == target)
}

/// Follow a path of nested FourCCs from `[start..end)`.
pub(crate) fn find_path(data: &[u8], start: usize, end: usize, path: &[[u8; 4]]) -> Option<BoxView> {
    let (first, rest) = path.split_first()?;
    let found = find_first_box(data, start, end, *first)?;
    if rest.is_empty() {
        Some(found)
    } else {
        find_path(data, found.body_start, found.end, rest)
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

/// Read `(version, flags)` of the full box whose body starts at `body_start`.
pub(crate) fn full_box_header(data: &[u8], body_start: usize) -> Option<(u8, u32)> {
    let word = read_u32(data, body_start)?;
    Some(((word >> 24) as u8, word & 0x00FF_FFFF))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((8 + body.len()) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_read_extended_size_header() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        assert_eq!(read_box_header(&data), Some((20, *b"mdat", 16)));
    }

    #[test]
    fn test_find_path_through_nested_boxes() {
        let inner = make_box(b"tfdt", &[1, 2, 3, 4]);
        let traf = make_box(b"traf", &inner);
        let mut data = make_box(b"mfhd", &[0; 8]);
        data.extend(make_box(b"moof", &traf));

        let found = find_path(&data, 0, data.len(), &[*b"moof", *b"traf", *b"tfdt"]).unwrap();
        assert_eq!(&data[found.body_start..found.end], &[1, 2, 3, 4]);
        assert!(find_path(&data, 0, data.len(), &[*b"moof", *b"trun"]).is_none());
    }

    #[test]
    fn test_children_stops_on_truncated_box() {
        let mut data = make_box(b"free", &[]);
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        assert_eq!(children(&data, 0, data.len()).count(), 1);
    }
}
