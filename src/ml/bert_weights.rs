// ============================================================
// Layer 5 - Pretrained BERT Weights
// ============================================================
// Copies a HuggingFace `model.safetensors` into a freshly
// initialised SentenceEncoder. Names follow the BERT layout,
// with or without a leading "bert.":
//
//   embeddings.{word,position,token_type}_embeddings.weight
//   embeddings.LayerNorm.{weight,bias}
//   encoder.layer.{i}.attention.self.{query,key,value}.{weight,bias}
//   encoder.layer.{i}.attention.output.dense.{weight,bias}
//   encoder.layer.{i}.attention.output.LayerNorm.{weight,bias}
//   encoder.layer.{i}.intermediate.dense.{weight,bias}
//   encoder.layer.{i}.output.dense.{weight,bias}
//   encoder.layer.{i}.output.LayerNorm.{weight,bias}
//
// PyTorch stores linear weights as [out, in]; Burn keeps them
// as [in, out], so every linear weight is transposed on load.
// Pooler and MLM head tensors are ignored.

use anyhow::{anyhow, bail, ensure, Context, Result};
use burn::{
    module::Param,
    nn::{Embedding, LayerNorm, Linear},
    prelude::*,
    tensor::{bf16, f16},
};
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use std::path::Path;

use crate::ml::lora::LoraLinear;
use crate::ml::model::{EncoderLayer, Embeddings, SentenceEncoder};

/// Replace every base weight of `encoder` with the tensors in `path`.
pub fn load_safetensors<B: Backend>(
    encoder: SentenceEncoder<B>,
    path:    &Path,
    device:  &B::Device,
) -> Result<SentenceEncoder<B>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    let tensors = SafeTensors::deserialize(&bytes)
        .map_err(|e| anyhow!("'{}' is not a safetensors file: {e}", path.display()))?;

    WeightMap::new(&tensors, device)
        .apply(encoder)
        .with_context(|| format!("Cannot map '{}' onto the encoder", path.display()))
}

struct WeightMap<'a, B: Backend> {
    tensors: &'a SafeTensors<'a>,
    prefix:  &'static str,
    device:  &'a B::Device,
}

impl<'a, B: Backend> WeightMap<'a, B> {
    fn new(tensors: &'a SafeTensors<'a>, device: &'a B::Device) -> Self {
        let prefix = if tensors.names().iter().any(|n| n.starts_with("bert.")) { "bert." } else { "" };
        Self { tensors, prefix, device }
    }

    fn apply(&self, encoder: SentenceEncoder<B>) -> Result<SentenceEncoder<B>> {
        let SentenceEncoder { embeddings, layers, max_position_embeddings } = encoder;

        let Embeddings { word, position, token_type, norm, dropout } = embeddings;
        let embeddings = Embeddings {
            word:       self.embedding(word, "embeddings.word_embeddings")?,
            position:   self.embedding(position, "embeddings.position_embeddings")?,
            token_type: self.embedding(token_type, "embeddings.token_type_embeddings")?,
            norm:       self.layer_norm(norm, "embeddings.LayerNorm")?,
            dropout,
        };

        let layers = layers
            .into_iter()
            .enumerate()
            .map(|(i, layer)| self.layer(layer, &format!("encoder.layer.{i}")))
            .collect::<Result<Vec<_>>>()?;

        Ok(SentenceEncoder { embeddings, layers, max_position_embeddings })
    }

    fn layer(&self, mut layer: EncoderLayer<B>, p: &str) -> Result<EncoderLayer<B>> {
        layer.attention.query = self.slot(layer.attention.query, &format!("{p}.attention.self.query"))?;
        layer.attention.key   = self.slot(layer.attention.key, &format!("{p}.attention.self.key"))?;
        layer.attention.value = self.slot(layer.attention.value, &format!("{p}.attention.self.value"))?;
        layer.attention.dense = self.slot(layer.attention.dense, &format!("{p}.attention.output.dense"))?;
        layer.attention.norm  = self.layer_norm(layer.attention.norm, &format!("{p}.attention.output.LayerNorm"))?;
        layer.intermediate    = self.slot(layer.intermediate, &format!("{p}.intermediate.dense"))?;
        layer.output          = self.slot(layer.output, &format!("{p}.output.dense"))?;
        layer.output_norm     = self.layer_norm(layer.output_norm, &format!("{p}.output.LayerNorm"))?;
        Ok(layer)
    }

    fn slot(&self, mut slot: LoraLinear<B>, name: &str) -> Result<LoraLinear<B>> {
        slot.base = self.linear(slot.base, name)?;
        Ok(slot)
    }

    fn linear(&self, mut linear: Linear<B>, name: &str) -> Result<Linear<B>> {
        let [d_in, d_out] = linear.weight.val().dims();
        let weight = self.tensor::<2>(&format!("{name}.weight"), [d_out, d_in])?;
        linear.weight = Param::from_tensor(weight.transpose());
        linear.bias   = Some(Param::from_tensor(self.tensor::<1>(&format!("{name}.bias"), [d_out])?));
        Ok(linear)
    }

    fn embedding(&self, mut embedding: Embedding<B>, name: &str) -> Result<Embedding<B>> {
        let dims = embedding.weight.val().dims();
        embedding.weight = Param::from_tensor(self.tensor::<2>(&format!("{name}.weight"), dims)?);
        Ok(embedding)
    }

    /// Older checkpoints name the LayerNorm parameters gamma/beta.
    fn layer_norm(&self, mut norm: LayerNorm<B>, name: &str) -> Result<LayerNorm<B>> {
        let dims = norm.gamma.val().dims();
        let (scale, shift) = if self.contains(&format!("{name}.gamma")) {
            ("gamma", "beta")
        } else {
            ("weight", "bias")
        };
        norm.gamma = Param::from_tensor(self.tensor::<1>(&format!("{name}.{scale}"), dims)?);
        norm.beta  = Param::from_tensor(self.tensor::<1>(&format!("{name}.{shift}"), dims)?);
        Ok(norm)
    }

    fn contains(&self, name: &str) -> bool {
        self.tensors.tensor(&format!("{}{name}", self.prefix)).is_ok()
    }

    fn tensor<const D: usize>(&self, name: &str, shape: [usize; D]) -> Result<Tensor<B, D>> {
        let full = format!("{}{name}", self.prefix);
        let view = self
            .tensors
            .tensor(&full)
            .map_err(|_| anyhow!("missing tensor '{full}'"))?;
        ensure!(
            view.shape() == shape.as_slice(),
            "tensor '{full}' has shape {:?}, the encoder expects {:?}",
            view.shape(),
            shape,
        );
        let values = to_f32(&view).with_context(|| format!("Cannot read tensor '{full}'"))?;
        Ok(Tensor::from_data(TensorData::new(values, shape), self.device))
    }
}

fn to_f32(view: &TensorView<'_>) -> Result<Vec<f32>> {
    let data = view.data();
    let values = match view.dtype() {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        other => bail!("unsupported dtype {other:?}"),
    };
    Ok(values)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::model::tests::tiny_config;
    use burn::backend::NdArray;
    use std::collections::HashMap;

    type TestBackend = NdArray;

    fn flat<const D: usize>(t: Tensor<TestBackend, D>) -> (Vec<f32>, Vec<usize>) {
        let shape = t.dims().to_vec();
        (t.into_data().convert::<f32>().to_vec().unwrap(), shape)
    }

    /// The encoder's base weights under their HuggingFace names and layout.
    pub(crate) fn hf_tensors(encoder: &SentenceEncoder<TestBackend>) -> Vec<(String, Vec<f32>, Vec<usize>)> {
        let mut out = Vec::new();
        let mut put = |name: String, (values, shape): (Vec<f32>, Vec<usize>)| out.push((name, values, shape));

        let e = &encoder.embeddings;
        put("embeddings.word_embeddings.weight".into(), flat(e.word.weight.val()));
        put("embeddings.position_embeddings.weight".into(), flat(e.position.weight.val()));
        put("embeddings.token_type_embeddings.weight".into(), flat(e.token_type.weight.val()));
        put("embeddings.LayerNorm.weight".into(), flat(e.norm.gamma.val()));
        put("embeddings.LayerNorm.bias".into(), flat(e.norm.beta.val()));

        for (i, layer) in encoder.layers.iter().enumerate() {
            let p = format!("encoder.layer.{i}");
            let linears = [
                ("attention.self.query",   &layer.attention.query.base),
                ("attention.self.key",     &layer.attention.key.base),
                ("attention.self.value",   &layer.attention.value.base),
                ("attention.output.dense", &layer.attention.dense.base),
                ("intermediate.dense",     &layer.intermediate.base),
                ("output.dense",           &layer.output.base),
            ];
            for (name, linear) in linears {
                put(format!("{p}.{name}.weight"), flat(linear.weight.val().transpose()));
                put(format!("{p}.{name}.bias"), flat(linear.bias.as_ref().unwrap().val()));
            }
            let norms = [
                ("attention.output.LayerNorm", &layer.attention.norm),
                ("output.LayerNorm",           &layer.output_norm),
            ];
            for (name, norm) in norms {
                put(format!("{p}.{name}.weight"), flat(norm.gamma.val()));
                put(format!("{p}.{name}.bias"), flat(norm.beta.val()));
            }
        }
        out
    }

    pub(crate) fn write_safetensors(path: &Path, tensors: &[(String, Vec<f32>, Vec<usize>)], prefix: &str) {
        let bytes: Vec<(String, Vec<u8>, Vec<usize>)> = tensors
            .iter()
            .map(|(name, values, shape)| {
                let raw = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                (format!("{prefix}{name}"), raw, shape.clone())
            })
            .collect();
        let views: HashMap<String, TensorView<'_>> = bytes
            .iter()
            .map(|(name, raw, shape)| {
                (name.clone(), TensorView::new(Dtype::F32, shape.clone(), raw).unwrap())
            })
            .collect();
        std::fs::write(path, safetensors::serialize(&views, &None).unwrap()).unwrap();
    }

    fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        flat(t).0
    }

    #[test]
    fn test_loads_every_base_weight_with_bert_prefix() {
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("model.safetensors");
        let device = Default::default();

        let source = tiny_config().init::<TestBackend>(&device);
        write_safetensors(&path, &hf_tensors(&source), "bert.");

        let target = tiny_config().init::<TestBackend>(&device);
        let loaded = load_safetensors(target, &path, &device).unwrap();

        // Round trip through the HF layout reproduces every tensor exactly
        assert_eq!(hf_tensors(&loaded), hf_tensors(&source));
        assert_eq!(
            values(loaded.layers[1].attention.query.base.weight.val()),
            values(source.layers[1].attention.query.base.weight.val()),
        );
    }

    #[test]
    fn test_linear_weights_are_transposed() {
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("model.safetensors");
        let device = Default::default();
        let cfg    = tiny_config();
        let d      = cfg.hidden_size;

        let mut tensors = hf_tensors(&cfg.init::<TestBackend>(&device));
        // Row r of the PyTorch [out, in] matrix holds r*d .. r*d + d
        let query: Vec<f32> = (0..d * d).map(|v| v as f32).collect();
        for (name, values, _) in tensors.iter_mut() {
            if name == "encoder.layer.0.attention.self.query.weight" {
                *values = query.clone();
            }
        }
        write_safetensors(&path, &tensors, "");

        let loaded = load_safetensors(cfg.init::<TestBackend>(&device), &path, &device).unwrap();
        let w = values(loaded.layers[0].attention.query.base.weight.val());
        // Burn [in, out]: element (i, o) equals PyTorch (o, i)
        assert_eq!(w[1], query[d]);
        assert_eq!(w[d], query[1]);
        assert_eq!(w[2 * d + 3], query[3 * d + 2]);
    }

    #[test]
    fn test_legacy_gamma_beta_names_are_accepted() {
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("model.safetensors");
        let device = Default::default();

        let source = tiny_config().init::<TestBackend>(&device);
        let tensors: Vec<_> = hf_tensors(&source)
            .into_iter()
            .map(|(name, v, s)| {
                let name = name
                    .replace("LayerNorm.weight", "LayerNorm.gamma")
                    .replace("LayerNorm.bias", "LayerNorm.beta");
                (name, v, s)
            })
            .collect();
        write_safetensors(&path, &tensors, "");

        let loaded = load_safetensors(tiny_config().init::<TestBackend>(&device), &path, &device).unwrap();
        assert_eq!(
            values(loaded.embeddings.norm.gamma.val()),
            values(source.embeddings.norm.gamma.val()),
        );
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("model.safetensors");
        let device = Default::default();

        let mut bigger = tiny_config();
        bigger.vocab_size = 64;
        write_safetensors(&path, &hf_tensors(&bigger.init::<TestBackend>(&device)), "");

        let err = load_safetensors(tiny_config().init::<TestBackend>(&device), &path, &device).unwrap_err();
        assert!(format!("{err:#}").contains("word_embeddings"));
    }

    #[test]
    fn test_missing_tensor_is_rejected() {
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("model.safetensors");
        let device = Default::default();

        let tensors: Vec<_> = hf_tensors(&tiny_config().init::<TestBackend>(&device))
            .into_iter()
            .filter(|(name, _, _)| !name.starts_with("encoder.layer.1.output.dense"))
            .collect();
        write_safetensors(&path, &tensors, "");

        let err = load_safetensors(tiny_config().init::<TestBackend>(&device), &path, &device).unwrap_err();
        assert!(format!("{err:#}").contains("encoder.layer.1.output.dense.weight"));
    }

    #[test]
    fn test_half_precision_tensors_are_widened() {
        let raw: Vec<u8> = [1.5f32, -2.0]
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect();
        let view = TensorView::new(Dtype::F16, vec![2], &raw).unwrap();
        assert_eq!(to_f32(&view).unwrap(), vec![1.5, -2.0]);
    }
}
