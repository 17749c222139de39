use std::path::Path;

use candle_core::safetensors::Load;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, Embedding, Linear, Module, ModuleT, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use safetensors::SafeTensors;
use tracing::{debug, info};

use crate::config::{EncoderConfig, TrainConfig};
use crate::data::vocab::PAD_ID;
use crate::error::{Result, SeqTagError};
use crate::model::SequenceTagger;

const BERT_PREFIX: &str = "bert";

enum Encoder {
    Bert(BertModel),
    Embedding(Embedding),
}

/// Encoder + Conv1d head tagger (BERT or embedding encoder, dropout,
/// convolution with ReLU, linear classifier).
pub struct BertCnn {
    name: String,
    encoder: Encoder,
    dropout: Dropout,
    conv: Conv1d,
    classifier: Linear,
    varmap: VarMap,
}

impl BertCnn {
    /// Build a freshly initialised tagger for `config`.
    ///
    /// With a BERT encoder the pretrained weights in
    /// `<path>/model.safetensors` are copied into the trainable parameters;
    /// `vocab_size` is only used by the embedding encoder.
    pub fn new(config: &TrainConfig, vocab_size: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let (encoder, hidden_size) = match &config.encoder {
            EncoderConfig::Bert { path } => {
                let config_str = std::fs::read_to_string(path.join("config.json"))?;
                let bert_config: BertConfig = serde_json::from_str(&config_str)?;
                let bert = BertModel::load(vb.pp(BERT_PREFIX), &bert_config)?;
                (Encoder::Bert(bert), bert_config.hidden_size)
            }
            EncoderConfig::Embedding { hidden_size, .. } => {
                let embedding = candle_nn::embedding(vocab_size, *hidden_size, vb.pp("embedding"))?;
                (Encoder::Embedding(embedding), *hidden_size)
            }
        };

        let head = &config.head;
        let conv_config = Conv1dConfig {
            padding: head.kernel_size / 2,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(
            hidden_size,
            head.conv_channels,
            head.kernel_size,
            conv_config,
            vb.pp("conv"),
        )?;
        let classifier = candle_nn::linear(head.conv_channels, config.label_num, vb.pp("classifier"))?;

        let model = Self {
            name: config.model_name.clone(),
            encoder,
            dropout: Dropout::new(head.dropout),
            conv,
            classifier,
            varmap,
        };

        if let EncoderConfig::Bert { path } = &config.encoder {
            model.load_pretrained(path.join("model.safetensors"))?;
        }

        Ok(model)
    }

    /// Copy pretrained encoder weights into the matching parameters.
    ///
    /// Checkpoints name tensors with or without a `bert.` prefix and older
    /// ones call layer-norm parameters `gamma`/`beta`; all spellings are
    /// tried. Head parameters keep their initialisation.
    fn load_pretrained<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let tensors = SafeTensors::deserialize(&bytes)?;

        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| SeqTagError::Config("parameter map lock poisoned".into()))?;

        let mut loaded = 0usize;
        let mut encoder_vars = 0usize;
        for (name, var) in data.iter() {
            let Some(local) = name.strip_prefix(BERT_PREFIX).and_then(|n| n.strip_prefix('.')) else {
                continue;
            };
            encoder_vars += 1;

            let Some(view) = pretrained_names(local)
                .iter()
                .find_map(|candidate| tensors.tensor(candidate).ok())
            else {
                debug!(name = %name, "no pretrained tensor, keeping initialisation");
                continue;
            };

            let tensor = view.load(var.device())?.to_dtype(var.dtype())?;
            var.set(&tensor)?;
            loaded += 1;
        }

        if loaded == 0 {
            return Err(SeqTagError::Config(format!(
                "no encoder weights in {} match the BERT parameters",
                path.display()
            )));
        }
        info!(loaded, total = encoder_vars, path = %path.display(), "Loaded pretrained encoder weights");
        Ok(())
    }
}

fn pretrained_names(local: &str) -> Vec<String> {
    let mut names = vec![local.to_string(), format!("{BERT_PREFIX}.{local}")];
    let legacy = if let Some(stem) = local.strip_suffix("LayerNorm.weight") {
        Some(format!("{stem}LayerNorm.gamma"))
    } else {
        local
            .strip_suffix("LayerNorm.bias")
            .map(|stem| format!("{stem}LayerNorm.beta"))
    };
    if let Some(legacy) = legacy {
        names.push(format!("{BERT_PREFIX}.{legacy}"));
        names.push(legacy);
    }
    names
}

impl SequenceTagger for BertCnn {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward_t(&self, input_ids: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let hidden = match &self.encoder {
            Encoder::Bert(bert) => {
                let token_type_ids = input_ids.zeros_like()?;
                let attention_mask = input_ids.ne(PAD_ID)?;
                bert.forward(input_ids, &token_type_ids, Some(&attention_mask))?
            }
            Encoder::Embedding(embedding) => embedding.forward(input_ids)?,
        };
        let hidden = self.dropout.forward_t(&hidden, train)?;

        // Conv1d wants [batch, channels, len].
        let features = hidden.transpose(1, 2)?.contiguous()?;
        let features = self.conv.forward(&features)?.relu()?;
        let features = features.transpose(1, 2)?.contiguous()?;
        let features = self.dropout.forward_t(&features, train)?;

        self.classifier.forward(&features)
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}
