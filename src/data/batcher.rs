// ============================================================
// Layer 4 - Triplet Batcher
// ============================================================
// Converts sentences into tensors the encoder can consume.
//
// How batching works here:
//   Input:  N sentences
//   Output: TextBatch with tensors of shape [N, S]
//
//   Each sentence is tokenized (truncated to max_len), then
//   padded with the pad id to S = the longest sequence in the
//   batch. The attention mask marks real tokens with 1.
//
//   A triplet batch is three text batches: anchors, positives
//   and negatives, each padded independently.
//
// Tokenization can fail, so batching returns Result instead of
// going through Burn's infallible Batcher trait.
//
// Reference: Burn Book §4 (Batcher)

use anyhow::Result;
use burn::prelude::*;
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::data::dataset::SentenceTable;
use crate::data::triplet_sampler::{SamplerConfig, TripletSampler};
use crate::domain::traits::TripletSource;
use crate::domain::triplet::Triplet;

// ─── TextBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TextBatch<B: Backend> {
    /// Token ids, shape [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,
}

#[derive(Clone)]
pub struct TextBatcher<B: Backend> {
    tokenizer: Arc<Tokenizer>,
    pad_id:    u32,
    device:    B::Device,
}

impl<B: Backend> TextBatcher<B> {
    pub fn new(tokenizer: Arc<Tokenizer>, pad_id: u32, device: B::Device) -> Self {
        Self { tokenizer, pad_id, device }
    }

    /// The same tokenizer, producing tensors for another backend.
    pub fn to_backend<B2: Backend>(&self, device: B2::Device) -> TextBatcher<B2> {
        TextBatcher::new(self.tokenizer.clone(), self.pad_id, device)
    }

    pub fn batch(&self, sentences: Vec<String>) -> Result<TextBatch<B>> {
        let batch_size = sentences.len();
        let encodings = self
            .tokenizer
            .encode_batch(sentences, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {e}"))?;

        // An empty sentence still needs one column
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut ids  = Vec::with_capacity(batch_size * seq_len);
        let mut mask = Vec::with_capacity(batch_size * seq_len);
        for enc in &encodings {
            let tokens = enc.get_ids();
            ids.extend(tokens.iter().map(|&t| t as i32));
            mask.extend(std::iter::repeat(1i32).take(tokens.len()));

            let pad = seq_len - tokens.len();
            ids.extend(std::iter::repeat(self.pad_id as i32).take(pad));
            mask.extend(std::iter::repeat(0i32).take(pad));
        }

        let input_ids = Tensor::<B, 1, Int>::from_ints(ids.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);

        Ok(TextBatch { input_ids, attention_mask })
    }
}

// ─── TripletBatch ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TripletBatch<B: Backend> {
    pub anchor:   TextBatch<B>,
    pub positive: TextBatch<B>,
    pub negative: TextBatch<B>,
}

impl<B: Backend> TextBatcher<B> {
    pub fn batch_triplets(&self, items: Vec<Triplet>) -> Result<TripletBatch<B>> {
        let mut anchors   = Vec::with_capacity(items.len());
        let mut positives = Vec::with_capacity(items.len());
        let mut negatives = Vec::with_capacity(items.len());
        for t in items {
            anchors.push(t.anchor);
            positives.push(t.positive);
            negatives.push(t.negative);
        }

        Ok(TripletBatch {
            anchor:   self.batch(anchors)?,
            positive: self.batch(positives)?,
            negative: self.batch(negatives)?,
        })
    }
}

// ─── TripletLoader ────────────────────────────────────────────────────────────
/// Feeds tensor triplet batches to the training loop, one
/// freshly sampled epoch at a time.
pub struct TripletLoader<B: Backend> {
    table:   Arc<SentenceTable>,
    batcher: TextBatcher<B>,
    sampler: SamplerConfig,
}

impl<B: Backend> TripletLoader<B> {
    pub fn new(table: Arc<SentenceTable>, batcher: TextBatcher<B>, sampler: SamplerConfig) -> Self {
        Self { table, batcher, sampler }
    }
}

impl<B: Backend> TripletSource for TripletLoader<B> {
    type Batch   = TripletBatch<B>;
    type Sampler = TripletBatches<B>;

    fn epoch_sampler(&self, epoch: usize) -> Result<Self::Sampler> {
        Ok(TripletBatches {
            inner:   TripletSampler::new(&self.table, self.sampler, epoch)?,
            batcher: self.batcher.clone(),
        })
    }
}

/// Lazily tokenizes each sampled batch as the loop asks for it.
pub struct TripletBatches<B: Backend> {
    inner:   TripletSampler,
    batcher: TextBatcher<B>,
}

impl<B: Backend> Iterator for TripletBatches<B> {
    type Item = Result<TripletBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|items| self.batcher.batch_triplets(items))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<B: Backend> ExactSizeIterator for TripletBatches<B> {}
