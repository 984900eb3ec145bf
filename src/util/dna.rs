/// DNA 碱基与整数字母表的互转。
/// PRG 编码约定：{1:A, 2:C, 3:G, 4:T}，0 预留为 $，>=5 为变异位点标记。
#[inline]
pub fn encode_base(b: u8) -> Option<u8> {
    match b.to_ascii_uppercase() {
        b'A' => Some(1),
        b'C' => Some(2),
        b'G' => Some(3),
        b'T' => Some(4),
        _ => None,
    }
}

#[inline]
pub fn decode_base(a: u8) -> u8 {
    match a {
        1 => b'A',
        2 => b'C',
        3 => b'G',
        4 => b'T',
        _ => b'N',
    }
}

/// 将 read 编码为整数字母表。包含非 ACGT 字符时返回 None（该 read 视为无法比对）。
pub fn encode_read(seq: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(seq.len());
    for &b in seq {
        out.push(encode_base(b)?);
    }
    Some(out)
}

/// 编码空间内的互补碱基：1<->4（A/T），2<->3（C/G）。
#[inline]
pub fn complement_encoded(base: u8) -> u8 {
    5 - base
}

/// 编码空间内的反向互补序列。
pub fn revcomp_encoded(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement_encoded(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_read_valid_bases() {
        let result = encode_read(b"AaCcGgTt").unwrap();
        assert_eq!(result, vec![1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn encode_read_rejects_ambiguous() {
        assert!(encode_read(b"ACGNT").is_none());
    }

    #[test]
    fn revcomp_roundtrip() {
        let seq = encode_read(b"ACGTT").unwrap();
        let rc = revcomp_encoded(&seq);
        assert_eq!(rc, encode_read(b"AACGT").unwrap());
        assert_eq!(revcomp_encoded(&rc), seq);
    }
}
