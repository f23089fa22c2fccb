//! Atomic mutation semantics.

use crate::types::MutationType;
use bytes::Bytes;
use std::cmp::Ordering;

/// Maximum value size accepted by the engine.
pub(crate) const VALUE_SIZE_LIMIT: usize = 100_000;

/// Length of a commit versionstamp (8-byte version, 2-byte batch order).
pub(crate) const VERSIONSTAMP_LEN: usize = 10;

/// Applies a non-versionstamp atomic mutation to `existing`.
///
/// Returns the new value, or `None` when the mutation clears the key.
pub(crate) fn apply(op: MutationType, existing: Option<&[u8]>, param: &[u8]) -> Option<Bytes> {
    let out = match op {
        MutationType::Add => {
            let existing = existing.unwrap_or(&[]);
            let mut out = Vec::with_capacity(param.len());
            let mut carry = 0u16;
            for (i, p) in param.iter().enumerate() {
                let e = existing.get(i).copied().unwrap_or(0);
                let sum = u16::from(e) + u16::from(*p) + carry;
                out.push((sum & 0xff) as u8);
                carry = sum >> 8;
            }
            out
        }
        MutationType::BitAnd => bitwise(existing, param, |a, b| a & b),
        MutationType::BitOr => bitwise(existing, param, |a, b| a | b),
        MutationType::BitXor => bitwise(existing, param, |a, b| a ^ b),
        MutationType::AppendIfFits => {
            let existing = existing.unwrap_or(&[]);
            if existing.len() + param.len() > VALUE_SIZE_LIMIT {
                existing.to_vec()
            } else {
                [existing, param].concat()
            }
        }
        MutationType::Max | MutationType::Min => match existing {
            None => param.to_vec(),
            Some(existing) => {
                let existing = fit(existing, param.len());
                let ord = compare_le(&existing, param);
                let keep_existing = match op {
                    MutationType::Max => ord == Ordering::Greater,
                    _ => ord == Ordering::Less,
                };
                if keep_existing {
                    existing
                } else {
                    param.to_vec()
                }
            }
        },
        MutationType::ByteMin => match existing {
            Some(existing) if existing < param => existing.to_vec(),
            _ => param.to_vec(),
        },
        MutationType::ByteMax => match existing {
            Some(existing) if existing > param => existing.to_vec(),
            _ => param.to_vec(),
        },
        MutationType::CompareAndClear => match existing {
            Some(existing) if existing == param => return None,
            Some(existing) => existing.to_vec(),
            None => return None,
        },
        MutationType::SetVersionstampedKey | MutationType::SetVersionstampedValue => {
            return existing.map(Bytes::copy_from_slice);
        }
    };
    Some(Bytes::from(out))
}

/// Splices `stamp` into `template` at the little-endian `u32` offset stored
/// in its last four bytes. Returns `None` if the offset is out of bounds.
pub(crate) fn splice_versionstamp(
    template: &[u8],
    stamp: &[u8; VERSIONSTAMP_LEN],
) -> Option<Bytes> {
    let split = template.len().checked_sub(4)?;
    let (body, offset) = template.split_at(split);
    let offset = u32::from_le_bytes(offset.try_into().ok()?) as usize;
    let end = offset.checked_add(VERSIONSTAMP_LEN)?;
    if end > body.len() {
        return None;
    }
    let mut out = body.to_vec();
    out[offset..end].copy_from_slice(stamp);
    Some(Bytes::from(out))
}

/// Whether `template` carries an in-bounds versionstamp offset.
pub(crate) fn is_versionstamp_template(template: &[u8]) -> bool {
    splice_versionstamp(template, &[0; VERSIONSTAMP_LEN]).is_some()
}

/// Builds the versionstamp for a commit version.
pub(crate) fn versionstamp(version: i64) -> [u8; VERSIONSTAMP_LEN] {
    let mut stamp = [0u8; VERSIONSTAMP_LEN];
    stamp[..8].copy_from_slice(&version.to_be_bytes());
    stamp
}

fn bitwise(existing: Option<&[u8]>, param: &[u8], f: impl Fn(u8, u8) -> u8) -> Vec<u8> {
    match existing {
        None => param.to_vec(),
        Some(existing) => fit(existing, param.len())
            .into_iter()
            .zip(param)
            .map(|(a, b)| f(a, *b))
            .collect(),
    }
}

/// Truncates or zero-extends to `len` bytes.
fn fit(value: &[u8], len: usize) -> Vec<u8> {
    let mut out = value.iter().copied().take(len).collect::<Vec<_>>();
    out.resize(len, 0);
    out
}

fn compare_le(a: &[u8], b: &[u8]) -> Ordering {
    a.iter().rev().cmp(b.iter().rev())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_little_endian_with_carry() {
        let out = apply(MutationType::Add, Some(&[0xff, 0x00][..]), &[0x01, 0x00]).unwrap();
        assert_eq!(&out[..], &[0x00, 0x01]);
        let out = apply(MutationType::Add, None, &5u64.to_le_bytes()).unwrap();
        assert_eq!(&out[..], &5u64.to_le_bytes());
    }

    #[test]
    fn bitwise_fits_to_operand_width() {
        let out = apply(MutationType::BitOr, Some(&[0b0001][..]), &[0b0100, 0xff]).unwrap();
        assert_eq!(&out[..], &[0b0101, 0xff]);
        let out = apply(MutationType::BitAnd, Some(&[0xf0, 0x0f, 0xaa][..]), &[0xff]).unwrap();
        assert_eq!(&out[..], &[0xf0]);
    }

    #[test]
    fn min_max_compare_as_unsigned_integers() {
        let big = 300u16.to_le_bytes();
        let small = 2u16.to_le_bytes();
        assert_eq!(&apply(MutationType::Max, Some(&small[..]), &big).unwrap()[..], &big);
        assert_eq!(&apply(MutationType::Min, Some(&small[..]), &big).unwrap()[..], &small);
    }

    #[test]
    fn byte_min_max_are_lexicographic() {
        assert_eq!(&apply(MutationType::ByteMin, Some(&b"b"[..]), b"ab").unwrap()[..], b"ab");
        assert_eq!(&apply(MutationType::ByteMax, Some(&b"b"[..]), b"ab").unwrap()[..], b"b");
    }

    #[test]
    fn compare_and_clear() {
        assert_eq!(apply(MutationType::CompareAndClear, Some(&b"x"[..]), b"x"), None);
        assert_eq!(
            apply(MutationType::CompareAndClear, Some(&b"y"[..]), b"x").as_deref(),
            Some(&b"y"[..])
        );
    }

    #[test]
    fn versionstamp_splice() {
        let mut template = b"pre".to_vec();
        template.extend_from_slice(&[0u8; VERSIONSTAMP_LEN]);
        template.extend_from_slice(&3u32.to_le_bytes());
        let stamp = versionstamp(0x0102);
        let out = splice_versionstamp(&template, &stamp).unwrap();
        assert_eq!(&out[..3], b"pre");
        assert_eq!(&out[3..], &stamp);

        assert!(splice_versionstamp(&[0, 0, 0, 0], &stamp).is_none());
    }
}
