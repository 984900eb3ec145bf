//! PRG 文本的解析、校验与掩码生成。
//!
//! PRG（population reference graph）线性文本由 ACGT 与十进制标记数字交织而成：
//! 奇数标记为变异位点边界（首尾各出现一次），偶数标记为等位基因分隔符
//! （等于边界值 +1）。编码后字母表：{1,2,3,4} 为碱基，>=5 为标记。

use anyhow::{anyhow, bail, Result};

/// 变异位点标记的最小取值。
pub const MIN_SITE_MARKER: u32 = 5;

/// 标记的显式分类，从原始数值一次性推导，避免在调用点反复做奇偶/算术判断。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// 位点边界标记（奇数），携带位点自身的边界值。
    SiteBoundary { site: u32 },
    /// 等位基因分隔标记（偶数），携带所属位点的边界值。
    AlleleSeparator { site: u32 },
}

impl Marker {
    /// 从编码值推导标记类型；碱基与哨兵（<5）返回 None。
    pub fn from_raw(value: u32) -> Option<Marker> {
        if value < MIN_SITE_MARKER {
            return None;
        }
        if value % 2 == 1 {
            Some(Marker::SiteBoundary { site: value })
        } else {
            Some(Marker::AlleleSeparator { site: value - 1 })
        }
    }

    /// 所属位点的边界标记值。
    pub fn site(&self) -> u32 {
        match *self {
            Marker::SiteBoundary { site } => site,
            Marker::AlleleSeparator { site } => site,
        }
    }
}

/// 位点边界值映射到从 0 开始的位点序号。
#[inline]
pub fn site_index(site_marker: u32) -> usize {
    ((site_marker - MIN_SITE_MARKER) / 2) as usize
}

/// 由最大字母值推导位点数量（标记分配允许空洞，按最大值计）。
pub fn number_of_sites(max_alphabet: u32) -> usize {
    if max_alphabet < MIN_SITE_MARKER {
        return 0;
    }
    // 偶数最大值说明最后一个位点的边界是 max-1
    let last_boundary = if max_alphabet % 2 == 0 { max_alphabet - 1 } else { max_alphabet };
    site_index(last_boundary) + 1
}

/// 将原始 PRG 文本编码为整数序列：碱基映射到 1..4，极大数字串解析为单个标记值。
pub fn encode_prg(raw: &[u8]) -> Result<Vec<u32>> {
    let mut encoded: Vec<u32> = Vec::with_capacity(raw.len());
    let mut marker: u64 = 0;
    let mut in_digits = false;

    for (pos, &c) in raw.iter().enumerate() {
        if c.is_ascii_digit() {
            marker = marker * 10 + u64::from(c - b'0');
            if marker > u64::from(u32::MAX) {
                bail!("marker number too large at byte {}", pos);
            }
            in_digits = true;
            continue;
        }

        if in_digits {
            flush_marker(&mut encoded, marker, pos)?;
            marker = 0;
            in_digits = false;
        }

        match crate::util::dna::encode_base(c) {
            Some(base) => encoded.push(u32::from(base)),
            None => bail!("unexpected character {:?} at byte {}", c as char, pos),
        }
    }
    if in_digits {
        flush_marker(&mut encoded, marker, raw.len())?;
    }

    if encoded.is_empty() {
        bail!("PRG text contains no sequence");
    }
    Ok(encoded)
}

fn flush_marker(encoded: &mut Vec<u32>, marker: u64, pos: usize) -> Result<()> {
    if marker < u64::from(MIN_SITE_MARKER) {
        bail!("digits before byte {} form invalid marker value {}", pos, marker);
    }
    encoded.push(marker as u32);
    Ok(())
}

/// 结构校验：每个边界标记恰好出现两次、分隔符只出现在所属位点内部、
/// 每个位点至少两个等位基因且无空等位基因、位点不嵌套。
pub fn validate_encoded_prg(prg: &[u32]) -> Result<()> {
    // (当前位点边界值, 分隔符数, 当前等位基因内已见碱基数)
    let mut open: Option<(u32, u32, u64)> = None;
    let mut closed: Vec<u32> = Vec::new();

    for (i, &symbol) in prg.iter().enumerate() {
        let marker = match Marker::from_raw(symbol) {
            None => {
                if let Some(state) = open.as_mut() {
                    state.2 += 1;
                }
                continue;
            }
            Some(m) => m,
        };

        match (marker, open) {
            (Marker::SiteBoundary { site }, None) => {
                if closed.contains(&site) {
                    bail!("boundary marker {} occurs more than twice (position {})", site, i);
                }
                open = Some((site, 0, 0));
            }
            (Marker::SiteBoundary { site }, Some((current, separators, bases))) => {
                if site != current {
                    bail!("site {} opened inside unclosed site {} (position {})", site, current, i);
                }
                if bases == 0 {
                    bail!("site {} has an empty final allele (position {})", site, i);
                }
                if separators == 0 {
                    bail!("site {} has fewer than two alleles (position {})", site, i);
                }
                closed.push(site);
                open = None;
            }
            (Marker::AlleleSeparator { site }, Some((current, separators, bases))) => {
                if site != current {
                    bail!(
                        "allele separator {} found inside site {} (position {})",
                        site + 1,
                        current,
                        i
                    );
                }
                if bases == 0 {
                    bail!("site {} has an empty allele (position {})", site, i);
                }
                open = Some((current, separators + 1, 0));
            }
            (Marker::AlleleSeparator { site }, None) => {
                bail!("allele separator {} outside any site (position {})", site + 1, i);
            }
        }
    }

    if let Some((site, _, _)) = open {
        bail!("unmatched boundary marker {}", site);
    }
    Ok(())
}

/// 读取并编码 PRG 文件；首尾空白剔除后整体编码并做结构校验。
pub fn parse_prg_file(path: &str) -> Result<Vec<u32>> {
    let raw = std::fs::read(path)
        .map_err(|e| anyhow!("cannot read PRG file '{}': {}", path, e))?;
    let trimmed = raw
        .strip_suffix(b"\n")
        .unwrap_or(&raw);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    let encoded = encode_prg(trimmed)?;
    validate_encoded_prg(&encoded)?;
    Ok(encoded)
}

/// 序列中的最大字母值（决定标记字母表上界）。
pub fn max_alphabet_num(prg: &[u32]) -> u32 {
    prg.iter().copied().max().unwrap_or(0)
}

/// 生成位点掩码：位于位点内部的碱基位置记其边界标记值，其余为 0。
/// 标记位置自身不标记。
pub fn generate_sites_mask(prg: &[u32]) -> Vec<u32> {
    let mut mask = vec![0u32; prg.len()];
    let mut current_site: u32 = 0;

    for (i, &symbol) in prg.iter().enumerate() {
        match Marker::from_raw(symbol) {
            Some(Marker::SiteBoundary { site }) => {
                if current_site == 0 {
                    current_site = site;
                } else {
                    current_site = 0;
                }
            }
            Some(Marker::AlleleSeparator { .. }) => {}
            None => {
                if current_site != 0 {
                    mask[i] = current_site;
                }
            }
        }
    }
    mask
}

/// 生成等位基因掩码：位点内部碱基记 1 起的等位基因序号，分隔符使序号 +1。
pub fn generate_allele_mask(prg: &[u32]) -> Vec<u32> {
    let mut mask = vec![0u32; prg.len()];
    let mut within_site = false;
    let mut current_allele: u32 = 0;

    for (i, &symbol) in prg.iter().enumerate() {
        match Marker::from_raw(symbol) {
            Some(Marker::SiteBoundary { .. }) => {
                if within_site {
                    within_site = false;
                    current_allele = 0;
                } else {
                    within_site = true;
                    current_allele = 1;
                }
            }
            Some(Marker::AlleleSeparator { .. }) => {
                if within_site {
                    current_allele += 1;
                }
            }
            None => {
                if within_site {
                    mask[i] = current_allele;
                }
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_single_site() {
        let result = encode_prg(b"a5g6t5c").unwrap();
        assert_eq!(result, vec![1, 5, 3, 6, 4, 5, 2]);
    }

    #[test]
    fn encode_double_digit_marker() {
        let result = encode_prg(b"a13g14t13tt").unwrap();
        assert_eq!(result, vec![1, 13, 3, 14, 4, 13, 4, 4]);
    }

    #[test]
    fn encode_rejects_unexpected_char() {
        assert!(encode_prg(b"acgXt").is_err());
    }

    #[test]
    fn encode_rejects_small_marker() {
        assert!(encode_prg(b"a2c").is_err());
    }

    #[test]
    fn validate_accepts_two_sites() {
        let prg = encode_prg(b"a5g6t5cc7g8tt8aa7").unwrap();
        assert!(validate_encoded_prg(&prg).is_ok());
    }

    #[test]
    fn validate_rejects_unmatched_boundary() {
        let prg = encode_prg(b"a5g6t").unwrap();
        assert!(validate_encoded_prg(&prg).is_err());
    }

    #[test]
    fn validate_rejects_nested_site() {
        let prg = encode_prg(b"a5g7c8t7g5").unwrap();
        assert!(validate_encoded_prg(&prg).is_err());
    }

    #[test]
    fn validate_rejects_single_allele_site() {
        let prg = encode_prg(b"a5ggg5c").unwrap();
        assert!(validate_encoded_prg(&prg).is_err());
    }

    #[test]
    fn validate_rejects_stray_separator() {
        let prg = encode_prg(b"a6c").unwrap();
        assert!(validate_encoded_prg(&prg).is_err());
    }

    #[test]
    fn sites_mask_single_site() {
        let prg = encode_prg(b"a5g6t5c").unwrap();
        let result = generate_sites_mask(&prg);
        assert_eq!(result, vec![0, 0, 5, 0, 5, 0, 0]);
    }

    #[test]
    fn sites_mask_two_sites() {
        let prg = encode_prg(b"a5g6t5cc7g8tt8aa7").unwrap();
        let result = generate_sites_mask(&prg);
        assert_eq!(
            result,
            vec![0, 0, 5, 0, 5, 0, 0, 0, 0, 7, 0, 7, 7, 0, 7, 7, 0]
        );
    }

    #[test]
    fn allele_mask_single_site() {
        let prg = encode_prg(b"a5g6t5c").unwrap();
        let result = generate_allele_mask(&prg);
        assert_eq!(result, vec![0, 0, 1, 0, 2, 0, 0]);
    }

    #[test]
    fn allele_mask_three_alleles() {
        let prg = encode_prg(b"a5g6t6aa5c").unwrap();
        let result = generate_allele_mask(&prg);
        assert_eq!(result, vec![0, 0, 1, 0, 2, 0, 3, 3, 0, 0]);
    }

    #[test]
    fn allele_mask_double_digit_marker() {
        let prg = encode_prg(b"a13g14t13tt").unwrap();
        let result = generate_allele_mask(&prg);
        assert_eq!(result, vec![0, 0, 1, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn mask_roundtrip_property() {
        // site_mask 非零当且仅当 allele_mask 非零
        let prg = encode_prg(b"gct5c6g6t5ac7cc8a7").unwrap();
        let sites = generate_sites_mask(&prg);
        let alleles = generate_allele_mask(&prg);
        for (s, a) in sites.iter().zip(alleles.iter()) {
            assert_eq!(*s != 0, *a != 0);
        }
    }

    #[test]
    fn number_of_sites_from_max_alphabet() {
        assert_eq!(number_of_sites(4), 0);
        assert_eq!(number_of_sites(6), 1);
        assert_eq!(number_of_sites(8), 2);
        assert_eq!(number_of_sites(14), 5);
    }
}
