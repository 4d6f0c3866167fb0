//! Tagger: opens a trained model and decodes label sequences for new
//! instances (spec §4.6).
//!
//! Grounded on `original_source/lib/crf/src/crf1d_tag.c`: precompute the
//! transition matrix once from the model's label references, then for
//! each instance only rebuild the state table before running Viterbi.
//! Generalizes the teacher's `tagger.rs` (a fixed BIO `Tag`/
//! `EntityCategory` enum) to opaque label ids/strings resolved through
//! the model's own dictionaries, since this crate's label set is
//! whatever the training data defined.

use std::path::Path;

use crate::context::Context;
use crate::data::Instance;
use crate::error::Result;
use crate::model::ModelReader;

/// A loaded, read-only model ready to decode instances.
///
/// Per spec §5, a `Tagger` is safe to share across threads as long as
/// each thread drives it through its own [`Context`] (obtained via
/// [`Tagger::new_context`]) -- the model bytes and precomputed transition
/// matrix are read-only after construction.
pub struct Tagger {
    model: ModelReader,
    trans: Vec<f64>,
}

impl Tagger {
    pub fn open(path: &Path) -> Result<Self> {
        let model = ModelReader::open(path)?;
        let l = model.num_labels();
        let mut trans = vec![0.0f64; l * l];

        for i in 0..l {
            for &fid in &model.label_refs(i as u32)? {
                let (_, _src, dst, weight) = model.feature(fid)?;
                trans[i * l + dst as usize] += weight;
            }
        }

        Ok(Tagger { model, trans })
    }

    pub fn num_labels(&self) -> usize {
        self.model.num_labels()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        (0..self.num_labels()).filter_map(move |i| self.model.label_string(i as u32))
    }

    pub fn label_string(&self, id: u32) -> Option<&str> {
        self.model.label_string(id)
    }

    pub fn attr_to_id(&self, s: &str) -> Option<u32> {
        self.model.attr_to_id(s)
    }

    /// A scratch [`Context`] sized for this tagger's label count, to be
    /// reused across calls to [`Tagger::tag`] (or held one-per-thread for
    /// concurrent use).
    pub fn new_context(&self) -> Context {
        Context::new(self.num_labels())
    }

    /// `tag(instance) -> (labels, score)` (spec §4.6): rebuilds the state
    /// table for `instance`, fills the precomputed transition matrix,
    /// runs log-space Viterbi, and returns the argmax path with its
    /// score.
    pub fn tag(&self, instance: &Instance, ctx: &mut Context) -> Result<(Vec<u32>, f64)> {
        let l = self.num_labels();
        ctx.set_num_items(instance.len());
        ctx.reset_state();
        ctx.reset_transitions();
        for i in 0..l {
            ctx.trans_mut(i).copy_from_slice(&self.trans[i * l..(i + 1) * l]);
        }

        for (t, item) in instance.items.iter().enumerate() {
            for content in &item.attributes {
                for &fid in &self.model.attr_refs(content.attribute_id)? {
                    let (_, _src, dst, weight) = self.model.feature(fid)?;
                    ctx.state_mut(t)[dst as usize] += weight * content.scale;
                }
            }
        }

        ctx.viterbi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Item};
    use crate::dictionary::Dictionary;
    use crate::features::FeatureGenOptions;
    use crate::model::ModelWriter;

    fn build_and_save(path: &Path) -> Dataset {
        let mut ds = Dataset::new();
        let a_maria = ds.attributes.intern("word=Maria").unwrap();
        let a_trabalha = ds.attributes.intern("word=trabalha").unwrap();
        let per = ds.labels.intern("PER").unwrap();
        let o = ds.labels.intern("O").unwrap();

        let mut i0 = Item::new();
        i0.push(a_maria, 1.0);
        let mut i1 = Item::new();
        i1.push(a_trabalha, 1.0);

        let mut inst = Instance::new();
        inst.items = vec![i0, i1];
        inst.labels = vec![per, o];
        ds.push(inst);
        ds.seal();

        let features = crate::features::FeatureTable::generate(
            &ds,
            ds.num_labels(),
            ds.num_attrs(),
            FeatureGenOptions::default(),
        );
        let weights: Vec<f64> = (0..features.len()).map(|_| 5.0).collect();
        let labels: Vec<String> = (0..ds.num_labels())
            .map(|i| ds.labels.reverse(i as u32).unwrap().to_owned())
            .collect();
        let attrs: Vec<String> = (0..ds.num_attrs())
            .map(|i| ds.attributes.reverse(i as u32).unwrap().to_owned())
            .collect();
        ModelWriter::save(path, &features, &labels, &attrs, &weights, false).unwrap();
        ds
    }

    #[test]
    fn tagger_reproduces_gold_labels_with_strong_weights() {
        let path = std::env::temp_dir().join(format!("crf-core-tagger-test-{}.model", std::process::id()));
        let ds = build_and_save(&path);

        let tagger = Tagger::open(&path).unwrap();
        let mut ctx = tagger.new_context();
        let (path_labels, _score) = tagger.tag(&ds.instances[0], &mut ctx).unwrap();
        assert_eq!(path_labels, ds.instances[0].labels);

        let _ = std::fs::remove_file(&path);
    }
}
