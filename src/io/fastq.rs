use anyhow::{anyhow, Result};
use std::io::BufRead;

#[derive(Debug, Clone)]
pub struct FastqRecord {
    pub id: String,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

pub struct FastqReader<R: BufRead> {
    reader: R,
    buf: String,
    done: bool,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: String::new(), done: false }
    }

    pub fn next_record(&mut self) -> Result<Option<FastqRecord>> {
        if self.done { return Ok(None); }

        // header line starting with '@'
        self.buf.clear();
        let mut n = self.reader.read_line(&mut self.buf)?;
        if n == 0 { self.done = true; return Ok(None); }
        if !self.buf.starts_with('@') {
            return Err(anyhow!("FASTQ header not starting with '@'"));
        }
        let header = self.buf[1..].trim_end().to_string();
        let id = header
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();

        // sequence line
        self.buf.clear();
        n = self.reader.read_line(&mut self.buf)?;
        if n == 0 { return Err(anyhow!("unexpected EOF after header")); }
        let seq = self.buf.trim_end().as_bytes().to_vec();

        // plus line
        self.buf.clear();
        n = self.reader.read_line(&mut self.buf)?;
        if n == 0 || !self.buf.starts_with('+') { return Err(anyhow!("missing '+' line")); }

        // quality line
        self.buf.clear();
        n = self.reader.read_line(&mut self.buf)?;
        if n == 0 { return Err(anyhow!("missing quality line")); }
        let qual = self.buf.trim_end().as_bytes().to_vec();

        if qual.len() != seq.len() { return Err(anyhow!("seq/qual length mismatch")); }

        Ok(Some(FastqRecord { id, seq, qual }))
    }
}

/// 一次性读入整个 FASTQ 文件的序列（比对阶段需要先整体校验 read 长度）。
pub fn read_all_sequences(path: &str) -> Result<Vec<Vec<u8>>> {
    let fh = std::fs::File::open(path)
        .map_err(|e| anyhow!("cannot open reads file '{}': {}", path, e))?;
    let mut reader = FastqReader::new(std::io::BufReader::new(fh));
    let mut seqs = Vec::new();
    while let Some(rec) = reader.next_record()? {
        seqs.push(rec.seq);
    }
    Ok(seqs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_simple_fastq() {
        let data = b"@r1 desc\nACGT\n+\nIIII\n@r2\nTTT\n+\nIII\n";
        let cursor = Cursor::new(&data[..]);
        let mut r = FastqReader::new(cursor);

        let r1 = r.next_record().unwrap().unwrap();
        assert_eq!(r1.id, "r1");
        assert_eq!(r1.seq, b"ACGT");

        let r2 = r.next_record().unwrap().unwrap();
        assert_eq!(r2.id, "r2");
        assert_eq!(r2.seq, b"TTT");

        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn reject_length_mismatch() {
        let data = b"@r1\nACGT\n+\nII\n";
        let cursor = Cursor::new(&data[..]);
        let mut r = FastqReader::new(cursor);
        assert!(r.next_record().is_err());
    }
}
