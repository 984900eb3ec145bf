//! 索引构建：编码 PRG -> 后缀数组 -> BWT -> 变异感知 FM 索引 + 位点/等位掩码。
//! 构建一次、整体持久化，比对阶段只读共享。

pub mod bwt;
pub mod fm;
pub mod sa;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::prg;
use fm::FmIndex;

/// 构建产物的目录内文件名。
pub const ENCODED_PRG_FILE: &str = "encoded_prg.bin";
pub const FM_INDEX_FILE: &str = "fm_index.bin";
pub const SITES_MASK_FILE: &str = "sites_mask.bin";
pub const ALLELE_MASK_FILE: &str = "allele_mask.bin";
pub const KMER_INDEX_FILE: &str = "kmer_index.txt";
pub const META_FILE: &str = "meta.json";

/// Occ 采样块长。
pub const DEFAULT_OCC_BLOCK: usize = 512;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub prg_file: Option<String>,
    pub build_args: Option<String>,
    pub build_timestamp: Option<String>,
    pub kmer_size: u32,
    pub max_read_size: u32,
    pub all_kmers: bool,
}

/// 对一个 PRG 的全部只读索引结构。
#[derive(Debug)]
pub struct PrgIndex {
    /// 编码 PRG（不含哨兵）
    pub encoded_prg: Vec<u32>,
    pub fm: FmIndex,
    /// 与 encoded_prg 等长：位点边界标记值 / 0
    pub sites_mask: Vec<u32>,
    /// 与 encoded_prg 等长：1 起等位序号 / 0
    pub allele_mask: Vec<u32>,
    /// 文本序标记位置（升序），提供 rank/select
    pub prg_marker_positions: Vec<u32>,
    pub max_alphabet: u32,
    pub meta: IndexMeta,
}

impl PrgIndex {
    /// 从已校验的编码 PRG 构建全套索引结构。
    pub fn build(encoded_prg: Vec<u32>, meta: IndexMeta) -> Result<Self> {
        prg::validate_encoded_prg(&encoded_prg)?;

        let sites_mask = prg::generate_sites_mask(&encoded_prg);
        let allele_mask = prg::generate_allele_mask(&encoded_prg);
        let max_alphabet = prg::max_alphabet_num(&encoded_prg);
        let prg_marker_positions: Vec<u32> = encoded_prg
            .iter()
            .enumerate()
            .filter(|&(_, &symbol)| symbol > 4)
            .map(|(i, _)| i as u32)
            .collect();

        // 末尾补哨兵后建 SA / BWT
        let mut text = encoded_prg.clone();
        text.push(0);
        let sa_arr = sa::build_sa(&text);
        let bwt_arr = bwt::build_bwt(&text, &sa_arr);
        let fm = FmIndex::build(bwt_arr, sa_arr, max_alphabet, DEFAULT_OCC_BLOCK);

        Ok(Self {
            encoded_prg,
            fm,
            sites_mask,
            allele_mask,
            prg_marker_positions,
            max_alphabet,
            meta,
        })
    }

    /// 位点数量（按最大标记值计，标记分配的空洞算作空位点）。
    pub fn number_of_sites(&self) -> usize {
        prg::number_of_sites(self.max_alphabet)
    }

    /// 文本位置处的位点掩码；哨兵及越界位置视为位点外。
    #[inline]
    pub fn site_at(&self, text_pos: usize) -> u32 {
        if text_pos < self.sites_mask.len() {
            self.sites_mask[text_pos]
        } else {
            0
        }
    }

    /// 文本位置处的等位掩码；哨兵及越界位置视为位点外。
    #[inline]
    pub fn allele_at(&self, text_pos: usize) -> u32 {
        if text_pos < self.allele_mask.len() {
            self.allele_mask[text_pos]
        } else {
            0
        }
    }

    /// 等位基因内位置相对其起点的偏移：最近左侧标记的下一个位置为偏移 0。
    pub fn allele_start_offset(&self, within_allele_pos: usize) -> usize {
        let rank = self
            .prg_marker_positions
            .partition_point(|&p| (p as usize) < within_allele_pos);
        let marker_pos = self.prg_marker_positions[rank - 1] as usize;
        within_allele_pos - marker_pos - 1
    }

    /// 位点边界标记的两个文本位置（入口在前，出口在后）。
    pub fn site_text_range(&self, site_marker: u32) -> (usize, usize) {
        let first_sa = self.fm.marker_first_sa_index(site_marker);
        let a = self.fm.text_pos(first_sa);
        let b = self.fm.text_pos(first_sa + 1);
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    // ── 持久化 ───────────────────────────────────────

    /// 将四个索引工件写入目录（kmer 索引另行写入同目录）。
    pub fn save_to_dir(&self, dir: &str) -> Result<()> {
        let dir = Path::new(dir);
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow!("cannot create index directory '{}': {}", dir.display(), e))?;

        write_bincode(&dir.join(ENCODED_PRG_FILE), &self.encoded_prg)?;
        write_bincode(&dir.join(FM_INDEX_FILE), &self.fm)?;
        write_bincode(&dir.join(SITES_MASK_FILE), &self.sites_mask)?;
        write_bincode(&dir.join(ALLELE_MASK_FILE), &self.allele_mask)?;

        let meta_file = std::fs::File::create(dir.join(META_FILE))?;
        serde_json::to_writer_pretty(meta_file, &self.meta)?;
        Ok(())
    }

    /// 从目录读回索引；文本序标记位置与最大字母值从编码 PRG 重建（结果等价）。
    pub fn load_from_dir(dir: &str) -> Result<Self> {
        let dir = Path::new(dir);

        let encoded_prg: Vec<u32> = read_bincode(&dir.join(ENCODED_PRG_FILE))?;
        let fm: FmIndex = read_bincode(&dir.join(FM_INDEX_FILE))?;
        let sites_mask: Vec<u32> = read_bincode(&dir.join(SITES_MASK_FILE))?;
        let allele_mask: Vec<u32> = read_bincode(&dir.join(ALLELE_MASK_FILE))?;

        if sites_mask.len() != encoded_prg.len() || allele_mask.len() != encoded_prg.len() {
            bail!("index directory '{}' holds inconsistent artifacts", dir.display());
        }
        if fm.len() != encoded_prg.len() + 1 {
            bail!("FM index does not match encoded PRG in '{}'", dir.display());
        }

        let meta_file = std::fs::File::open(dir.join(META_FILE))
            .with_context(|| format!("cannot open '{}'", dir.join(META_FILE).display()))?;
        let meta: IndexMeta = serde_json::from_reader(meta_file)?;

        let max_alphabet = prg::max_alphabet_num(&encoded_prg);
        let prg_marker_positions: Vec<u32> = encoded_prg
            .iter()
            .enumerate()
            .filter(|&(_, &symbol)| symbol > 4)
            .map(|(i, _)| i as u32)
            .collect();

        Ok(Self {
            encoded_prg,
            fm,
            sites_mask,
            allele_mask,
            prg_marker_positions,
            max_alphabet,
            meta,
        })
    }
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut f = std::fs::File::create(path)
        .with_context(|| format!("cannot create '{}'", path.display()))?;
    bincode::serialize_into(&mut f, value)
        .with_context(|| format!("cannot serialize '{}'", path.display()))?;
    Ok(())
}

fn read_bincode<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let f = std::fs::File::open(path)
        .with_context(|| format!("cannot open '{}'", path.display()))?;
    let value = bincode::deserialize_from(std::io::BufReader::new(f))
        .with_context(|| format!("cannot deserialize '{}'", path.display()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn index_from_raw(raw: &[u8]) -> PrgIndex {
        let encoded = prg::encode_prg(raw).unwrap();
        PrgIndex::build(encoded, IndexMeta::default()).unwrap()
    }

    #[test]
    fn build_single_site_index() {
        let idx = index_from_raw(b"a5g6t5c");
        assert_eq!(idx.number_of_sites(), 1);
        assert_eq!(idx.sites_mask, vec![0, 0, 5, 0, 5, 0, 0]);
        assert_eq!(idx.allele_mask, vec![0, 0, 1, 0, 2, 0, 0]);
        assert_eq!(idx.prg_marker_positions, vec![1, 3, 5]);
    }

    #[test]
    fn site_text_range_orders_entry_exit() {
        let idx = index_from_raw(b"aca5g6t5gcatt");
        let (entry, exit) = idx.site_text_range(5);
        assert_eq!(idx.encoded_prg[entry], 5);
        assert_eq!(idx.encoded_prg[exit], 5);
        assert!(entry < exit);
        assert_eq!((entry, exit), (3, 7));
    }

    #[test]
    fn allele_start_offset_counts_from_marker() {
        // a 5 g 6 t 6 a a 5 c：位置 7 是第三个等位的第 2 个碱基
        let idx = index_from_raw(b"a5g6t6aa5c");
        assert_eq!(idx.allele_start_offset(6), 0);
        assert_eq!(idx.allele_start_offset(7), 1);
        assert_eq!(idx.allele_start_offset(2), 0);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = std::env::temp_dir().join("vbwt_rust_index_roundtrip");
        let dir_str = dir.to_str().unwrap();
        let idx = index_from_raw(b"gct5c6g6t5ac7cc8a7");
        idx.save_to_dir(dir_str).unwrap();

        let loaded = PrgIndex::load_from_dir(dir_str).unwrap();
        assert_eq!(loaded.encoded_prg, idx.encoded_prg);
        assert_eq!(loaded.sites_mask, idx.sites_mask);
        assert_eq!(loaded.allele_mask, idx.allele_mask);
        assert_eq!(loaded.prg_marker_positions, idx.prg_marker_positions);
        assert_eq!(loaded.max_alphabet, idx.max_alphabet);
        assert_eq!(loaded.fm.bwt, idx.fm.bwt);
        assert_eq!(loaded.fm.sa, idx.fm.sa);

        std::fs::remove_dir_all(dir).ok();
    }
}
