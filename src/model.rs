//! On-disk, memory-mappable binary model format (spec §4.5/§6).
//!
//! Grounded on `original_source/lib/crf/src/crf1d_train.c`
//! (`crf1dt_save_model`: pruning + dense fmap/amap remapping, chunk write
//! order) for the writer, and the general "memory-map, validate header,
//! expose zero-copy slices" shape the Design Notes call for on the
//! reader side in place of the source's `crf1dm_t` pointer-chasing reader.
//!
//! Layout: magic `"lCRF"`, u32 version, u32 feature-type tag, a 5-entry
//! section table (chunk id, offset, length), then the chunks themselves
//! in a fixed order: `FEATURES`, `LABELS`, `ATTRS`, `LABEL_REFS`,
//! `ATTR_REFS`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;

use crate::error::{CrfError, Result};
use crate::features::{FeatureKind, FeatureTable};

const MAGIC: &[u8; 4] = b"lCRF";
const VERSION: u32 = 1;
const FEATURE_TYPE_CRF1D: u32 = 1;
const NUM_CHUNKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum ChunkId {
    Features = 0,
    Labels = 1,
    Attrs = 2,
    LabelRefs = 3,
    AttrRefs = 4,
}

const CHUNK_ORDER: [ChunkId; NUM_CHUNKS] = [
    ChunkId::Features,
    ChunkId::Labels,
    ChunkId::Attrs,
    ChunkId::LabelRefs,
    ChunkId::AttrRefs,
];

fn kind_tag(kind: FeatureKind) -> u8 {
    match kind {
        FeatureKind::State => 0,
        FeatureKind::Transition => 1,
    }
}

fn kind_from_tag(tag: u8) -> Result<FeatureKind> {
    match tag {
        0 => Ok(FeatureKind::State),
        1 => Ok(FeatureKind::Transition),
        _ => Err(CrfError::Incompatible(format!("unknown feature kind tag {tag}"))),
    }
}

/// Writes a trained model to disk in the format read by [`ModelReader`].
pub struct ModelWriter;

impl ModelWriter {
    /// Saves `features`/`labels`/`attrs` to `path`. When `prune` is true,
    /// zero-weight features are dropped and surviving feature/attribute
    /// ids are densely remapped, per spec §4.5. Label ids are never
    /// remapped (every label participates in the model regardless of
    /// whether it has surviving features).
    pub fn save(
        path: &Path,
        features: &FeatureTable,
        labels: &[String],
        attrs: &[String],
        weights: &[f64],
        prune: bool,
    ) -> Result<()> {
        let (kept, amap) = Self::select_features(features, weights, attrs.len(), prune);

        let mut features_chunk = Vec::new();
        for &(kind, src, dst, weight) in &kept {
            let src = if kind == FeatureKind::State { amap[src as usize] } else { src as i32 };
            features_chunk.write_u8(kind_tag(kind))?;
            features_chunk.write_i32::<LittleEndian>(src)?;
            features_chunk.write_i32::<LittleEndian>(dst as i32)?;
            features_chunk.write_f64::<LittleEndian>(weight)?;
        }
        let features_chunk = with_count_prefix(kept.len() as u32, features_chunk)?;

        let labels_chunk = string_table_chunk(labels)?;

        let surviving_attrs: Vec<&String> = attrs
            .iter()
            .enumerate()
            .filter(|(i, _)| !prune || amap[*i] >= 0)
            .map(|(_, s)| s)
            .collect();
        let attrs_chunk = string_table_chunk(
            &surviving_attrs.iter().map(|s| (*s).clone()).collect::<Vec<_>>(),
        )?;

        let label_refs_chunk = refs_chunk(
            labels.len(),
            kept.iter().enumerate().filter_map(|(fid, &(kind, src, _, _))| {
                (kind == FeatureKind::Transition).then_some((src as usize, fid as i32))
            }),
        )?;
        let attr_refs_chunk = refs_chunk(
            surviving_attrs.len(),
            kept.iter().enumerate().filter_map(|(fid, &(kind, src, _, _))| {
                (kind == FeatureKind::State).then_some((amap[src as usize].max(0) as usize, fid as i32))
            }),
        )?;

        let chunks: [Vec<u8>; NUM_CHUNKS] = [
            features_chunk,
            labels_chunk,
            attrs_chunk,
            label_refs_chunk,
            attr_refs_chunk,
        ];

        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        w.write_all(MAGIC)?;
        w.write_u32::<LittleEndian>(VERSION)?;
        w.write_u32::<LittleEndian>(FEATURE_TYPE_CRF1D)?;

        let header_len = 4 + 4 + 4 + NUM_CHUNKS as u64 * (4 + 8 + 8);
        let mut offset = header_len;
        let mut table = Vec::new();
        for (id, chunk) in CHUNK_ORDER.iter().zip(chunks.iter()) {
            table.push((*id, offset, chunk.len() as u64));
            offset += chunk.len() as u64;
        }
        for (id, off, len) in &table {
            w.write_u32::<LittleEndian>(*id as u32)?;
            w.write_u64::<LittleEndian>(*off)?;
            w.write_u64::<LittleEndian>(*len)?;
        }
        for chunk in &chunks {
            w.write_all(chunk)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Returns `(kept_features, attribute_remap)` where `kept_features`
    /// is `(kind, src, dst, weight)` tuples surviving pruning, sorted the
    /// same way `FeatureTable::generate` sorts (by kind, src, dst), and
    /// `attribute_remap[a]` is the dense id attribute `a` maps to, or -1
    /// if `a` has no surviving state feature and pruning is enabled.
    fn select_features(
        features: &FeatureTable,
        weights: &[f64],
        num_attrs: usize,
        prune: bool,
    ) -> (Vec<(FeatureKind, u32, u32, f64)>, Vec<i32>) {
        let mut kept: Vec<(FeatureKind, u32, u32, f64)> = Vec::new();
        let mut attr_has_feature = vec![false; num_attrs];

        for (fid, feat) in features.iter() {
            let weight = weights[fid as usize];
            if prune && weight == 0.0 {
                continue;
            }
            if feat.kind == FeatureKind::State {
                attr_has_feature[feat.src as usize] = true;
            }
            kept.push((feat.kind, feat.src, feat.dst, weight));
        }

        let mut amap = vec![-1i32; num_attrs];
        let mut next = 0i32;
        for a in 0..num_attrs {
            let survives = !prune || attr_has_feature[a];
            if survives {
                amap[a] = next;
                next += 1;
            }
        }
        (kept, amap)
    }
}

fn with_count_prefix(count: u32, body: Vec<u8>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.write_u32::<LittleEndian>(count)?;
    out.extend_from_slice(&body);
    Ok(out)
}

fn string_table_chunk(strings: &[String]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for s in strings {
        body.write_u32::<LittleEndian>(s.len() as u32)?;
        body.extend_from_slice(s.as_bytes());
    }
    with_count_prefix(strings.len() as u32, body)
}

/// Builds a `LABEL_REFS`/`ATTR_REFS` chunk: `count:i32` ids, then for
/// each id `(count:i32, feature_id:i32 * count)`.
fn refs_chunk(num_ids: usize, pairs: impl Iterator<Item = (usize, i32)>) -> Result<Vec<u8>> {
    let mut buckets: Vec<Vec<i32>> = vec![Vec::new(); num_ids];
    for (id, fid) in pairs {
        buckets[id].push(fid);
    }
    let mut body = Vec::new();
    for bucket in &buckets {
        body.write_i32::<LittleEndian>(bucket.len() as i32)?;
        for &fid in bucket {
            body.write_i32::<LittleEndian>(fid)?;
        }
    }
    with_count_prefix(num_ids as u32, body)
}

/// A read-only, memory-mapped model (spec §4.5). Reads never allocate:
/// every accessor returns a value parsed from the mapped bytes or a slice
/// borrowing directly from them.
pub struct ModelReader {
    mmap: Mmap,
    sections: [(u64, u64); NUM_CHUNKS],
    label_strings: Vec<String>,
    attr_strings: Vec<String>,
}

impl ModelReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < 4 + 4 + 4 {
            return Err(CrfError::Incompatible("model file too short".into()));
        }
        if &mmap[0..4] != MAGIC {
            return Err(CrfError::Incompatible("bad model magic".into()));
        }
        let mut cursor = &mmap[4..];
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(CrfError::Incompatible(format!(
                "unsupported model version {version}"
            )));
        }
        let feature_type = cursor.read_u32::<LittleEndian>()?;
        if feature_type != FEATURE_TYPE_CRF1D {
            return Err(CrfError::Incompatible(format!(
                "unsupported feature type {feature_type}"
            )));
        }

        let mut sections = [(0u64, 0u64); NUM_CHUNKS];
        for (i, expected) in CHUNK_ORDER.iter().enumerate() {
            let id = cursor.read_u32::<LittleEndian>()?;
            if id != *expected as u32 {
                return Err(CrfError::Incompatible(format!(
                    "chunk {i} out of order: expected {:?}, found id {id}",
                    expected
                )));
            }
            let offset = cursor.read_u64::<LittleEndian>()?;
            let length = cursor.read_u64::<LittleEndian>()?;
            sections[i] = (offset, length);
        }

        let mut reader = ModelReader {
            mmap,
            sections,
            label_strings: Vec::new(),
            attr_strings: Vec::new(),
        };
        reader.label_strings = reader.read_string_table(ChunkId::Labels as usize)?;
        reader.attr_strings = reader.read_string_table(ChunkId::Attrs as usize)?;
        Ok(reader)
    }

    fn chunk_bytes(&self, idx: usize) -> &[u8] {
        let (offset, length) = self.sections[idx];
        &self.mmap[offset as usize..(offset + length) as usize]
    }

    fn read_string_table(&self, idx: usize) -> Result<Vec<String>> {
        let mut cursor = self.chunk_bytes(idx);
        let count = cursor.read_u32::<LittleEndian>()?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = cursor.read_u32::<LittleEndian>()? as usize;
            let (s, rest) = cursor.split_at(len);
            out.push(String::from_utf8_lossy(s).into_owned());
            cursor = rest;
        }
        Ok(out)
    }

    pub fn num_labels(&self) -> usize {
        self.label_strings.len()
    }

    pub fn num_attrs(&self) -> usize {
        self.attr_strings.len()
    }

    pub fn label_string(&self, id: u32) -> Option<&str> {
        self.label_strings.get(id as usize).map(String::as_str)
    }

    pub fn attr_string(&self, id: u32) -> Option<&str> {
        self.attr_strings.get(id as usize).map(String::as_str)
    }

    pub fn label_to_id(&self, s: &str) -> Option<u32> {
        self.label_strings.iter().position(|x| x == s).map(|i| i as u32)
    }

    pub fn attr_to_id(&self, s: &str) -> Option<u32> {
        self.attr_strings.iter().position(|x| x == s).map(|i| i as u32)
    }

    pub fn num_features(&self) -> Result<u32> {
        let mut cursor = self.chunk_bytes(ChunkId::Features as usize);
        Ok(cursor.read_u32::<LittleEndian>()?)
    }

    /// Decodes feature `fid` as `(kind, src, dst, weight)`.
    pub fn feature(&self, fid: u32) -> Result<(FeatureKind, i32, u32, f64)> {
        const RECORD_LEN: usize = 1 + 4 + 4 + 8;
        let body = &self.chunk_bytes(ChunkId::Features as usize)[4..];
        let start = fid as usize * RECORD_LEN;
        let mut cursor = &body[start..start + RECORD_LEN];
        let kind = kind_from_tag(cursor.read_u8()?)?;
        let src = cursor.read_i32::<LittleEndian>()?;
        let dst = cursor.read_i32::<LittleEndian>()? as u32;
        let weight = cursor.read_f64::<LittleEndian>()?;
        Ok((kind, src, dst, weight))
    }

    fn read_refs(&self, chunk_idx: usize, id: u32) -> Result<Vec<u32>> {
        let mut cursor = self.chunk_bytes(chunk_idx);
        let num_ids = cursor.read_u32::<LittleEndian>()?;
        if id >= num_ids {
            return Ok(Vec::new());
        }
        for _ in 0..id {
            let count = cursor.read_i32::<LittleEndian>()? as usize;
            for _ in 0..count {
                cursor.read_i32::<LittleEndian>()?;
            }
        }
        let count = cursor.read_i32::<LittleEndian>()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(cursor.read_i32::<LittleEndian>()? as u32);
        }
        Ok(out)
    }

    pub fn label_refs(&self, lid: u32) -> Result<Vec<u32>> {
        self.read_refs(ChunkId::LabelRefs as usize, lid)
    }

    pub fn attr_refs(&self, aid: u32) -> Result<Vec<u32>> {
        self.read_refs(ChunkId::AttrRefs as usize, aid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Instance, Item};
    use crate::dictionary::Dictionary;
    use crate::features::FeatureGenOptions;

    fn trained_fixture() -> (FeatureTable, Vec<String>, Vec<String>, Vec<f64>) {
        let mut ds = Dataset::new();
        let a0 = ds.attributes.intern("word=Maria").unwrap();
        let a1 = ds.attributes.intern("word=trabalha").unwrap();
        let per = ds.labels.intern("PER").unwrap();
        let o = ds.labels.intern("O").unwrap();

        let mut i0 = Item::new();
        i0.push(a0, 1.0);
        let mut i1 = Item::new();
        i1.push(a1, 1.0);

        let mut inst = Instance::new();
        inst.items = vec![i0, i1];
        inst.labels = vec![per, o];
        ds.push(inst);
        ds.seal();

        let features = FeatureTable::generate(&ds, ds.num_labels(), ds.num_attrs(), FeatureGenOptions::default());
        let weights: Vec<f64> = (0..features.len()).map(|i| 1.0 + i as f64).collect();
        let labels: Vec<String> = (0..ds.num_labels())
            .map(|i| ds.labels.reverse(i as u32).unwrap().to_owned())
            .collect();
        let attrs: Vec<String> = (0..ds.num_attrs())
            .map(|i| ds.attributes.reverse(i as u32).unwrap().to_owned())
            .collect();
        (features, labels, attrs, weights)
    }

    #[test]
    fn round_trip_preserves_feature_weights_without_pruning() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("crf-core-test-{}.model", std::process::id()));

        let (features, labels, attrs, weights) = trained_fixture();
        ModelWriter::save(&path, &features, &labels, &attrs, &weights, false).unwrap();

        let reader = ModelReader::open(&path).unwrap();
        assert_eq!(reader.num_labels(), labels.len());
        assert_eq!(reader.num_attrs(), attrs.len());
        assert_eq!(reader.num_features().unwrap() as usize, features.len());

        for (fid, feat) in features.iter() {
            let (kind, src, dst, weight) = reader.feature(fid).unwrap();
            assert_eq!(kind, feat.kind);
            assert_eq!(dst, feat.dst);
            if feat.kind == FeatureKind::Transition {
                assert_eq!(src as u32, feat.src);
            }
            assert_eq!(weight, weights[fid as usize]);
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pruning_drops_zero_weight_features_and_remaps_attrs() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("crf-core-test-prune-{}.model", std::process::id()));

        let (features, labels, attrs, mut weights) = trained_fixture();
        weights[0] = 0.0;
        ModelWriter::save(&path, &features, &labels, &attrs, &weights, true).unwrap();

        let reader = ModelReader::open(&path).unwrap();
        assert_eq!(reader.num_features().unwrap() as usize, features.len() - 1);

        let _ = std::fs::remove_file(&path);
    }
}
