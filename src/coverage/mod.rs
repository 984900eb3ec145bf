//! 覆盖统计：等位组合计数、逐碱基计数、等位总计数三套结构。
//! 全部通过共享引用并发写入（原子计数 + 位点粒度互斥），
//! 计数可交换，最终结果与 read 处理顺序无关。

pub mod allele_base;
pub mod grouped;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::index::PrgIndex;
use crate::prg::site_index;
use crate::search::SearchState;

pub use allele_base::AlleleBaseCoverage;
pub use grouped::GroupedAlleleCounts;

/// 逐碱基计数器位宽对应的饱和上限。
pub fn counter_cap(width_bits: u32) -> u32 {
    match width_bits {
        8 => u32::from(u8::MAX),
        16 => u32::from(u16::MAX),
        _ => u32::MAX,
    }
}

#[derive(Debug)]
pub struct Coverage {
    pub grouped: GroupedAlleleCounts,
    pub allele_base: AlleleBaseCoverage,
    /// allele_sum[位点][等位]：每个 read 对牵涉等位各计一次
    allele_sum: Vec<Vec<AtomicU64>>,
}

impl Coverage {
    pub fn generate(idx: &PrgIndex, cap: u32) -> Self {
        let grouped = GroupedAlleleCounts::generate(idx.number_of_sites());
        let allele_base = AlleleBaseCoverage::generate(idx, cap);
        let allele_sum = allele_base
            .shape()
            .into_iter()
            .map(|allele_count| (0..allele_count).map(|_| AtomicU64::new(0)).collect())
            .collect();
        Self {
            grouped,
            allele_base,
            allele_sum,
        }
    }

    /// 记录一个 read 的最终状态集。
    pub fn record(&self, states: &[SearchState], read_length: usize, idx: &PrgIndex) {
        let groups = grouped::implicated_allele_groups(states);
        self.grouped.record(&groups);

        for (&site, ids) in &groups {
            let sums = &self.allele_sum[site_index(site)];
            for &id in ids {
                sums[id as usize].fetch_add(1, Ordering::Relaxed);
            }
        }

        self.allele_base.record(states, read_length, idx);
    }

    pub fn allele_sum_snapshot(&self) -> Vec<Vec<u64>> {
        self.allele_sum
            .iter()
            .map(|site| site.iter().map(|c| c.load(Ordering::Relaxed)).collect())
            .collect()
    }

    /// 单个 JSON 对象聚合全部覆盖输出。
    pub fn dump_json(&self) -> serde_json::Value {
        serde_json::json!({
            "allele_base_counts": self.allele_base.dump_json(),
            "grouped_allele_counts": self.grouped.dump_json(),
            "allele_sum_counts": self.allele_sum_snapshot(),
        })
    }

    /// 写出覆盖 JSON 文件。
    pub fn dump_to_file(&self, path: &str) -> anyhow::Result<()> {
        let f = std::fs::File::create(path)
            .map_err(|e| anyhow::anyhow!("cannot write coverage '{}': {}", path, e))?;
        serde_json::to_writer(std::io::BufWriter::new(f), &self.dump_json())?;
        Ok(())
    }
}
