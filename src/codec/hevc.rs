//! hvcC inspection and repair for H.265 sequence-header tags.
//!
//! Some upstreams emit decoder configuration records with broken NAL
//! array sections. When the VPS/SPS/PPS units are still recoverable the
//! record is rewritten into a canonical form carrying exactly those
//! three arrays; well-formed records are passed through untouched.

use bytes::Bytes;

pub const NALU_TYPE_VPS: u8 = 32;
pub const NALU_TYPE_SPS: u8 = 33;
pub const NALU_TYPE_PPS: u8 = 34;

// FLV video tag: frame/codec byte, packet type, composition time.
const FLV_VIDEO_HEADER_LEN: usize = 5;
// HEVCDecoderConfigurationRecord up to (not including) numOfArrays.
const HVCC_FIXED_LEN: usize = 22;

#[derive(Default)]
struct NalArrays {
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    well_formed: bool,
}

fn scan_arrays(data: &[u8]) -> NalArrays {
    let mut out = NalArrays::default();
    if data.is_empty() {
        return out;
    }

    let num_arrays = data[0] as usize;
    let mut pos = 1usize;

    for _ in 0..num_arrays {
        if pos + 3 > data.len() {
            return out;
        }
        let nal_type = data[pos] & 0x3F;
        let num_units = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
        pos += 3;

        for _ in 0..num_units {
            if pos + 2 > data.len() {
                return out;
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if pos + len > data.len() {
                return out;
            }
            let unit = data[pos..pos + len].to_vec();
            pos += len;

            match nal_type {
                NALU_TYPE_VPS => out.vps = Some(unit),
                NALU_TYPE_SPS => out.sps = Some(unit),
                NALU_TYPE_PPS => out.pps = Some(unit),
                _ => {}
            }
        }
    }

    out.well_formed = true;
    out
}

/// Inspects the full payload of an H.265 sequence-header tag.
///
/// Returns `None` when the record is well-formed (source bytes are kept
/// verbatim) or unrecoverable; returns the rewritten payload when the
/// NAL array section is malformed but VPS, SPS and PPS were all found.
pub fn normalize_config(payload: &[u8]) -> Option<Bytes> {
    if payload.len() < FLV_VIDEO_HEADER_LEN + HVCC_FIXED_LEN + 1 {
        return None;
    }
    let record = &payload[FLV_VIDEO_HEADER_LEN..];
    let arrays = scan_arrays(&record[HVCC_FIXED_LEN..]);
    if arrays.well_formed {
        return None;
    }
    match (arrays.vps, arrays.sps, arrays.pps) {
        (Some(vps), Some(sps), Some(pps)) => {
            Some(rebuild(&record[..HVCC_FIXED_LEN], &vps, &sps, &pps))
        }
        _ => None,
    }
}

fn rebuild(config_head: &[u8], vps: &[u8], sps: &[u8], pps: &[u8]) -> Bytes {
    let total = FLV_VIDEO_HEADER_LEN
        + HVCC_FIXED_LEN
        + 1
        + 3 * 5
        + vps.len()
        + sps.len()
        + pps.len();
    let mut out = Vec::with_capacity(total);

    // keyframe + HEVC marker, sequence-header packet, zero composition time
    out.push(0x1C);
    out.push(0x00);
    out.extend_from_slice(&[0, 0, 0]);

    out.extend_from_slice(config_head);
    out.push(3);
    write_array(&mut out, NALU_TYPE_VPS, vps);
    write_array(&mut out, NALU_TYPE_SPS, sps);
    write_array(&mut out, NALU_TYPE_PPS, pps);

    Bytes::from(out)
}

fn write_array(out: &mut Vec<u8>, nal_type: u8, unit: &[u8]) {
    out.push(nal_type & 0x3F);
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&(unit.len() as u16).to_be_bytes());
    out.extend_from_slice(unit);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(nal_type: u8, units: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![nal_type & 0x3F];
        out.extend_from_slice(&(units.len() as u16).to_be_bytes());
        for unit in units {
            out.extend_from_slice(&(unit.len() as u16).to_be_bytes());
            out.extend_from_slice(unit);
        }
        out
    }

    fn config_payload(num_arrays: u8, arrays: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0x1C, 0x00, 0x00, 0x00, 0x00];
        let mut head = vec![1u8];
        head.resize(HVCC_FIXED_LEN, 0);
        out.extend_from_slice(&head);
        out.push(num_arrays);
        for a in arrays {
            out.extend_from_slice(a);
        }
        out
    }

    #[test]
    fn well_formed_record_is_kept_verbatim() {
        let payload = config_payload(
            3,
            &[
                array(NALU_TYPE_VPS, &[&[0x40, 0x01]]),
                array(NALU_TYPE_SPS, &[&[0x42, 0x01, 0x02]]),
                array(NALU_TYPE_PPS, &[&[0x44, 0x01]]),
            ],
        );
        assert!(normalize_config(&payload).is_none());
    }

    #[test]
    fn malformed_record_is_rebuilt_when_recoverable() {
        // four advertised arrays, only three present
        let payload = config_payload(
            4,
            &[
                array(NALU_TYPE_VPS, &[&[0x40, 0x01]]),
                array(NALU_TYPE_SPS, &[&[0x42, 0x01, 0x02]]),
                array(NALU_TYPE_PPS, &[&[0x44, 0x01]]),
            ],
        );
        let rebuilt = normalize_config(&payload).unwrap();
        assert_eq!(&rebuilt[0..2], &[0x1C, 0x00]);
        // original config head preserved
        assert_eq!(
            &rebuilt[FLV_VIDEO_HEADER_LEN..FLV_VIDEO_HEADER_LEN + HVCC_FIXED_LEN],
            &payload[FLV_VIDEO_HEADER_LEN..FLV_VIDEO_HEADER_LEN + HVCC_FIXED_LEN]
        );
        // the rewritten record scans clean with exactly three arrays
        let record = &rebuilt[FLV_VIDEO_HEADER_LEN..];
        assert_eq!(record[HVCC_FIXED_LEN], 3);
        let arrays = scan_arrays(&record[HVCC_FIXED_LEN..]);
        assert!(arrays.well_formed);
        assert_eq!(arrays.vps.as_deref(), Some(&[0x40, 0x01][..]));
        assert_eq!(arrays.sps.as_deref(), Some(&[0x42, 0x01, 0x02][..]));
        assert_eq!(arrays.pps.as_deref(), Some(&[0x44, 0x01][..]));
    }

    #[test]
    fn incomplete_parameter_sets_are_not_rebuilt() {
        // truncated before the PPS array ever appears
        let payload = config_payload(
            3,
            &[
                array(NALU_TYPE_VPS, &[&[0x40, 0x01]]),
                array(NALU_TYPE_SPS, &[&[0x42, 0x01]]),
            ],
        );
        assert!(normalize_config(&payload).is_none());
    }

    #[test]
    fn short_payload_is_ignored() {
        assert!(normalize_config(&[0x1C, 0x00, 0x00]).is_none());
    }
}
